fn main() {
    // Emits the ESP-IDF include/link environment for espidf builds.
    // On host builds the environment is absent and this is a no-op.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
