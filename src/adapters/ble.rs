//! Vendor BLE stack glue (ESP-IDF / Bluedroid only).
//!
//! Implements [`BleStack`] over the raw Bluedroid C API and translates
//! the GAP/GATT callbacks the AT surface consumes into typed
//! [`StackEvent`]s on a bounded channel. The stack task drains that
//! channel together with the op bridge, so every stack entry stays on one
//! execution context.
//!
//! Only the events the protocol engine consumes are decoded; everything
//! else is dropped at the callback boundary.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use crate::bridge::PushKind;
use crate::link::events::{AdvReport, ConnectionComplete, GattValue, Role, ServiceInfo, SmState};
use crate::link::{AdvConfig, BdAddr, ConnTimings, LinkHandle, ScanConfig};
use crate::ports::{BleStack, StackError};

/// Stack events decoded from Bluedroid callbacks, consumed by the stack
/// task and fed to the worker entry points.
pub enum StackEvent {
    Connected(ConnectionComplete),
    Disconnected { handle: LinkHandle, status: u8 },
    AdvReport(AdvReport),
    DiscoveryComplete {
        handle: LinkHandle,
        services: Vec<ServiceInfo>,
        status: u8,
    },
    CharValue { handle: LinkHandle, value: GattValue },
    ReadComplete { handle: LinkHandle, value_handle: u16, status: u8 },
    WriteComplete { handle: LinkHandle, value_handle: u16, status: u8 },
    SubscribeComplete { handle: LinkHandle, desc_handle: u16, status: u8 },
    ValueUpdate { handle: LinkHandle, kind: PushKind, value: GattValue },
    SmState(SmState),
    ServerWrite { handle: LinkHandle, att_handle: u16, data: heapless::Vec<u8, 255> },
    ServerReadProbe { handle: LinkHandle, att_handle: u16 },
    AdvSetTerminated,
}

static EVENTS: Channel<CriticalSectionRawMutex, StackEvent, 8> = Channel::new();

/// Await the next decoded stack event (stack-task side).
pub async fn next_event() -> StackEvent {
    EVENTS.receive().await
}

pub(crate) fn push_event(event: StackEvent) {
    if EVENTS.try_send(event).is_err() {
        warn!("ble: event queue full, event dropped");
    }
}

fn check(ret: esp_idf_sys::esp_err_t) -> Result<(), StackError> {
    if ret == esp_idf_sys::ESP_OK {
        Ok(())
    } else {
        Err(StackError::Rejected)
    }
}

/// Thin state carried by the adapter between calls.
pub struct VendorStack {
    gattc_if: esp_idf_sys::esp_gatt_if_t,
    gatts_if: esp_idf_sys::esp_gatt_if_t,
}

impl VendorStack {
    /// The controller and Bluedroid host must already be enabled and the
    /// GATT interfaces registered (board bring-up) before this is built.
    pub fn new(
        gattc_if: esp_idf_sys::esp_gatt_if_t,
        gatts_if: esp_idf_sys::esp_gatt_if_t,
    ) -> Self {
        Self { gattc_if, gatts_if }
    }
}

impl BleStack for VendorStack {
    fn set_random_address(&mut self, addr: BdAddr) {
        let mut raw = addr.0;
        if let Err(e) = check(unsafe { esp_idf_sys::esp_ble_gap_set_rand_addr(raw.as_mut_ptr()) }) {
            warn!("ble: set_rand_addr failed: {e}");
        }
    }

    fn start_advertising(&mut self, cfg: &AdvConfig) -> Result<(), StackError> {
        unsafe {
            check(esp_idf_sys::esp_ble_gap_config_adv_data_raw(
                cfg.adv_data.as_ptr() as *mut u8,
                cfg.adv_data.len() as u32,
            ))?;
            check(esp_idf_sys::esp_ble_gap_config_scan_rsp_data_raw(
                cfg.scan_rsp_data.as_ptr() as *mut u8,
                cfg.scan_rsp_data.len() as u32,
            ))?;
            let mut params = esp_idf_sys::esp_ble_adv_params_t {
                adv_int_min: cfg.int_min as u16,
                adv_int_max: cfg.int_max as u16,
                adv_type: esp_idf_sys::esp_ble_adv_type_t_ADV_TYPE_IND,
                own_addr_type: cfg.own_addr_type as esp_idf_sys::esp_ble_addr_type_t,
                peer_addr: cfg.peer_addr.0,
                peer_addr_type: cfg.peer_addr_type as esp_idf_sys::esp_ble_addr_type_t,
                channel_map: cfg.channel_map as esp_idf_sys::esp_ble_adv_channel_t,
                adv_filter_policy: cfg.adv_filter_policy_raw(),
            };
            check(esp_idf_sys::esp_ble_gap_start_advertising(&mut params))
        }
    }

    fn stop_advertising(&mut self) {
        let _ = check(unsafe { esp_idf_sys::esp_ble_gap_stop_advertising() });
    }

    fn start_scan(&mut self, cfg: &ScanConfig) -> Result<(), StackError> {
        unsafe {
            let mut params = esp_idf_sys::esp_ble_scan_params_t {
                scan_type: cfg.scan_type as esp_idf_sys::esp_ble_scan_type_t,
                own_addr_type: cfg.own_addr_type as esp_idf_sys::esp_ble_addr_type_t,
                scan_filter_policy: cfg.filter_policy as esp_idf_sys::esp_ble_scan_filter_t,
                scan_interval: cfg.interval,
                scan_window: cfg.window,
                scan_duplicate: esp_idf_sys::esp_ble_scan_duplicate_t_BLE_SCAN_DUPLICATE_DISABLE,
            };
            check(esp_idf_sys::esp_ble_gap_set_scan_params(&mut params))?;
            check(esp_idf_sys::esp_ble_gap_start_scanning(
                cfg.duration as u32,
            ))
        }
    }

    fn stop_scan(&mut self) {
        let _ = check(unsafe { esp_idf_sys::esp_ble_gap_stop_scanning() });
    }

    fn create_connection(
        &mut self,
        peer_addr_type: u8,
        peer_addr: BdAddr,
        _timing: ConnTimings,
    ) -> Result<(), StackError> {
        // Requested timing is applied via update_connection once the link
        // is up; Bluedroid's open() takes only the peer identity.
        let mut raw = peer_addr.0;
        check(unsafe {
            esp_idf_sys::esp_ble_gattc_open(
                self.gattc_if,
                raw.as_mut_ptr(),
                peer_addr_type as esp_idf_sys::esp_ble_addr_type_t,
                true,
            )
        })
    }

    fn cancel_connection(&mut self) {
        // Closing the in-flight virtual connection aborts the attempt.
        let _ = check(unsafe { esp_idf_sys::esp_ble_gattc_close(self.gattc_if, 0) });
    }

    fn disconnect(&mut self, handle: LinkHandle) {
        let _ = check(unsafe { esp_idf_sys::esp_ble_gattc_close(self.gattc_if, handle) });
    }

    fn update_connection(
        &mut self,
        handle: LinkHandle,
        timing: ConnTimings,
    ) -> Result<(), StackError> {
        let _ = handle;
        let mut params = esp_idf_sys::esp_ble_conn_update_params_t {
            bda: [0; 6],
            min_int: timing.min_interval,
            max_int: timing.max_interval,
            latency: timing.latency,
            timeout: timing.timeout,
        };
        check(unsafe { esp_idf_sys::esp_ble_gap_update_conn_params(&mut params) })
    }

    fn discover_all(&mut self, handle: LinkHandle) -> Result<(), StackError> {
        check(unsafe {
            esp_idf_sys::esp_ble_gattc_search_service(self.gattc_if, handle, core::ptr::null_mut())
        })
    }

    fn read_characteristic(
        &mut self,
        handle: LinkHandle,
        value_handle: u16,
    ) -> Result<(), StackError> {
        check(unsafe {
            esp_idf_sys::esp_ble_gattc_read_char(
                self.gattc_if,
                handle,
                value_handle,
                esp_idf_sys::esp_gatt_auth_req_t_ESP_GATT_AUTH_REQ_NONE,
            )
        })
    }

    fn write_characteristic(
        &mut self,
        handle: LinkHandle,
        value_handle: u16,
        data: &[u8],
    ) -> Result<(), StackError> {
        check(unsafe {
            esp_idf_sys::esp_ble_gattc_write_char(
                self.gattc_if,
                handle,
                value_handle,
                data.len() as u16,
                data.as_ptr() as *mut u8,
                esp_idf_sys::esp_gatt_write_type_t_ESP_GATT_WRITE_TYPE_RSP,
                esp_idf_sys::esp_gatt_auth_req_t_ESP_GATT_AUTH_REQ_NONE,
            )
        })
    }

    fn listen_value_updates(&mut self, handle: LinkHandle, value_handle: u16) {
        let _ = handle;
        let _ = check(unsafe {
            esp_idf_sys::esp_ble_gattc_register_for_notify(
                self.gattc_if,
                [0; 6].as_mut_ptr(),
                value_handle,
            )
        });
    }

    fn write_descriptor(
        &mut self,
        handle: LinkHandle,
        desc_handle: u16,
        config: u16,
    ) -> Result<(), StackError> {
        let mut value = config.to_le_bytes();
        check(unsafe {
            esp_idf_sys::esp_ble_gattc_write_char_descr(
                self.gattc_if,
                handle,
                desc_handle,
                value.len() as u16,
                value.as_mut_ptr(),
                esp_idf_sys::esp_gatt_write_type_t_ESP_GATT_WRITE_TYPE_RSP,
                esp_idf_sys::esp_gatt_auth_req_t_ESP_GATT_AUTH_REQ_NONE,
            )
        })
    }

    fn deferred_read_reply(
        &mut self,
        handle: LinkHandle,
        value_handle: u16,
        data: &[u8],
    ) -> Result<(), StackError> {
        let mut rsp = esp_idf_sys::esp_gatt_rsp_t::default();
        rsp.attr_value.handle = value_handle;
        rsp.attr_value.len = data.len().min(rsp.attr_value.value.len()) as u16;
        rsp.attr_value.value[..rsp.attr_value.len as usize]
            .copy_from_slice(&data[..rsp.attr_value.len as usize]);
        check(unsafe {
            esp_idf_sys::esp_ble_gatts_send_response(
                self.gatts_if,
                handle,
                0,
                esp_idf_sys::esp_gatt_status_t_ESP_GATT_OK,
                &mut rsp,
            )
        })
    }

    fn notify(
        &mut self,
        handle: LinkHandle,
        value_handle: u16,
        data: &[u8],
    ) -> Result<(), StackError> {
        check(unsafe {
            esp_idf_sys::esp_ble_gatts_send_indicate(
                self.gatts_if,
                handle,
                value_handle,
                data.len() as u16,
                data.as_ptr() as *mut u8,
                false,
            )
        })
    }

    fn indicate(
        &mut self,
        handle: LinkHandle,
        value_handle: u16,
        data: &[u8],
    ) -> Result<(), StackError> {
        check(unsafe {
            esp_idf_sys::esp_ble_gatts_send_indicate(
                self.gatts_if,
                handle,
                value_handle,
                data.len() as u16,
                data.as_ptr() as *mut u8,
                true,
            )
        })
    }

    fn configure_security(&mut self, enable: bool, io_capability: u8, auth_req: u8) {
        if !enable {
            return;
        }
        let mut iocap = io_capability;
        let mut auth = auth_req;
        unsafe {
            esp_idf_sys::esp_ble_gap_set_security_param(
                esp_idf_sys::esp_ble_sm_param_t_ESP_BLE_SM_IOCAP_MODE,
                (&mut iocap as *mut u8).cast(),
                1,
            );
            esp_idf_sys::esp_ble_gap_set_security_param(
                esp_idf_sys::esp_ble_sm_param_t_ESP_BLE_SM_AUTHEN_REQ_MODE,
                (&mut auth as *mut u8).cast(),
                1,
            );
        }
    }

    fn request_pairing(&mut self, handle: LinkHandle) {
        let _ = handle;
        // Bluedroid starts pairing on the first secured attribute access;
        // force it by raising the link to encrypted.
        let _ = check(unsafe {
            esp_idf_sys::esp_ble_set_encryption(
                [0; 6].as_mut_ptr(),
                esp_idf_sys::esp_ble_sec_act_t_ESP_BLE_SEC_ENCRYPT,
            )
        });
    }
}

impl AdvConfig {
    fn adv_filter_policy_raw(&self) -> esp_idf_sys::esp_ble_adv_filter_t {
        self.filter_policy as esp_idf_sys::esp_ble_adv_filter_t
    }
}

// ───────────────────────────────────────────────────────────────
// Callback decode
// ───────────────────────────────────────────────────────────────
//
// Registered once at board bring-up, before the stack task starts. Each
// callback runs in Bluedroid's own task; it only decodes and enqueues —
// the stack task is the single place that acts on events.

/// Register the GAP/GATTS callbacks feeding [`next_event`].
pub fn register_callbacks() -> Result<(), StackError> {
    unsafe {
        check(esp_idf_sys::esp_ble_gap_register_callback(Some(gap_cb)))?;
        check(esp_idf_sys::esp_ble_gatts_register_callback(Some(gatts_cb)))
    }
}

unsafe extern "C" fn gap_cb(
    event: esp_idf_sys::esp_gap_ble_cb_event_t,
    param: *mut esp_idf_sys::esp_ble_gap_cb_param_t,
) {
    let param = unsafe { &*param };
    match event {
        esp_idf_sys::esp_gap_ble_cb_event_t_ESP_GAP_BLE_SCAN_RESULT_EVT => {
            let res = unsafe { param.scan_rst };
            let mut data = heapless::Vec::new();
            let len = (res.adv_data_len as usize).min(res.ble_adv.len());
            let _ = data.extend_from_slice(&res.ble_adv[..len]);
            push_event(StackEvent::AdvReport(AdvReport {
                addr_type: res.ble_addr_type as u8,
                addr: BdAddr(res.bda),
                rssi: res.rssi as i8,
                scan_response: res.scan_rsp_len > 0 && res.adv_data_len == 0,
                data,
            }));
        }
        esp_idf_sys::esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
            push_event(StackEvent::AdvSetTerminated);
        }
        esp_idf_sys::esp_gap_ble_cb_event_t_ESP_GAP_BLE_AUTH_CMPL_EVT => {
            let auth = unsafe { param.ble_security.auth_cmpl };
            push_event(StackEvent::SmState(if auth.success {
                SmState::Paired
            } else {
                SmState::Failed
            }));
        }
        _ => {}
    }
}

unsafe extern "C" fn gatts_cb(
    event: esp_idf_sys::esp_gatts_cb_event_t,
    _gatts_if: esp_idf_sys::esp_gatt_if_t,
    param: *mut esp_idf_sys::esp_ble_gatts_cb_param_t,
) {
    let param = unsafe { &*param };
    match event {
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            let conn = unsafe { param.connect };
            push_event(StackEvent::Connected(ConnectionComplete {
                role: Role::Slave,
                status: 0,
                handle: conn.conn_id,
                peer_addr_type: conn.ble_addr_type as u8,
                peer_addr: BdAddr(conn.remote_bda),
                interval: conn.conn_params.interval,
                latency: conn.conn_params.latency,
                sup_timeout: conn.conn_params.timeout,
            }));
        }
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            let disc = unsafe { param.disconnect };
            push_event(StackEvent::Disconnected {
                handle: disc.conn_id,
                status: disc.reason as u8,
            });
        }
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
            let write = unsafe { param.write };
            let mut data = heapless::Vec::new();
            let slice = unsafe { core::slice::from_raw_parts(write.value, write.len as usize) };
            let _ = data.extend_from_slice(&slice[..slice.len().min(255)]);
            push_event(StackEvent::ServerWrite {
                handle: write.conn_id,
                att_handle: write.handle,
                data,
            });
        }
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_READ_EVT => {
            let read = unsafe { param.read };
            push_event(StackEvent::ServerReadProbe {
                handle: read.conn_id,
                att_handle: read.handle,
            });
        }
        _ => {}
    }
}
