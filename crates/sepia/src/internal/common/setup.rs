pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    env_logger::builder().format_timestamp_millis().init();
}
