use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes log capture once for the whole test binary.
///
/// The broker logs through the `log` facade; routing it into the test writer
/// keeps each test's broker output attached to the test that produced it.
pub fn setup_test_environment() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing_core::Level::TRACE)
            .with_test_writer()
            .init();
    });
}
