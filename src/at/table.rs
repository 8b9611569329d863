//! Static command table.
//!
//! One entry per AT command, carrying the name (with the leading `+`) and
//! the optional query/set handlers. Lookup is case-insensitive. Using a
//! form the entry does not carry (e.g. query on a set-only command) is the
//! same unrecognized-command error as an unknown name.

use super::engine::{self, AtEngine};

pub type GetHandler = fn(&mut AtEngine<'_>);
pub type SetHandler = fn(&mut AtEngine<'_>, &[&str]);

pub struct Command {
    pub name: &'static str,
    pub get: Option<GetHandler>,
    pub set: Option<SetHandler>,
}

const fn get(name: &'static str, get: GetHandler) -> Command {
    Command {
        name,
        get: Some(get),
        set: None,
    }
}

const fn set(name: &'static str, set: SetHandler) -> Command {
    Command {
        name,
        get: None,
        set: Some(set),
    }
}

const fn get_set(name: &'static str, get: GetHandler, set: SetHandler) -> Command {
    Command {
        name,
        get: Some(get),
        set: Some(set),
    }
}

pub static COMMANDS: &[Command] = &[
    // AT+RESET
    get("+RESET", engine::get_reset),
    // AT+SHUTDOWN
    get("+SHUTDOWN", engine::get_shutdown),
    // AT+POWERSAVING=<enable>
    set("+POWERSAVING", engine::set_power_saving),
    // AT+UART=<baud>
    set("+UART", engine::set_uart),
    // AT+BLEINIT?
    get("+BLEINIT", engine::get_ble_init),
    // AT+BLEADDR=<addr_type>,<random_addr>
    get_set("+BLEADDR", engine::get_ble_addr, engine::set_ble_addr),
    // +BLEADVPARAM:<int_min>,<int_max>,<adv_type>,<own_addr_type>,
    //              <channel_map>,<filter_policy>,<peer_addr_type>,<peer_addr>,<tx_power>
    get_set(
        "+BLEADVPARAM",
        engine::get_ble_adv_param,
        engine::set_ble_adv_param,
    ),
    // AT+BLEADVDATA="1122334455"
    get_set(
        "+BLEADVDATA",
        engine::get_ble_adv_data,
        engine::set_ble_adv_data,
    ),
    // AT+BLESCANRSPDATA=<scan_rsp_data>
    get_set(
        "+BLESCANRSPDATA",
        engine::get_ble_scan_rsp_data,
        engine::set_ble_scan_rsp_data,
    ),
    // AT+BLEADVSTART
    get("+BLEADVSTART", engine::get_ble_adv_start),
    // AT+BLEADVSTOP
    get("+BLEADVSTOP", engine::get_ble_adv_stop),
    // +BLESCANPARAM:<scan_type>,<own_addr_type>,<filter_policy>,<interval>,<window>
    get_set(
        "+BLESCANPARAM",
        engine::get_ble_scan_param,
        engine::set_ble_scan_param,
    ),
    // AT+BLESCAN=<enable>[,<interval>[,<filter_type>[,<filter_addr>]]]
    set("+BLESCAN", engine::set_ble_scan),
    // AT+BLECONN=<conn_index>,<remote_address>[,<addr_type>[,<timeout>]]
    get_set("+BLECONN", engine::get_ble_conn, engine::set_ble_conn),
    // +BLECONNPARAM:<conn_index>,<min_interval>,<max_interval>,<interval>,<latency>,<timeout>
    get_set(
        "+BLECONNPARAM",
        engine::get_ble_conn_param,
        engine::set_ble_conn_param,
    ),
    // AT+BLEDISCONN=<conn_index>
    set("+BLEDISCONN", engine::set_ble_disconn),
    // AT+BLEGATTC=<conn_index>
    set("+BLEGATTC", engine::set_ble_gattc),
    // AT+BLEGATTCRD=<conn_index>,<handle>
    set("+BLEGATTCRD", engine::set_ble_gattc_read),
    // AT+BLEGATTCWR=<conn_index>,<handle>,<value>
    set("+BLEGATTCWR", engine::set_ble_gattc_write),
    // AT+BLEGATTCSUB=<conn_index>,<handle>,<config>[,<desc_handle>]
    set("+BLEGATTCSUB", engine::set_ble_gattc_sub),
    // +BLEGATTSRD=<conn_index>,<att_handle>,<hex_data>
    set("+BLEGATTSRD", engine::set_ble_gatts_read),
    // +BLEGATTSWR=<conn_index>,<att_handle>,<mode>,<hex_data>
    set("+BLEGATTSWR", engine::set_ble_gatts_write),
    // +BLESECPARAM:<enable>,<auth_req>,<io_cap>
    set("+BLESECPARAM", engine::set_ble_sec_param),
];

pub fn find(name: &str) -> Option<&'static Command> {
    COMMANDS.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}
