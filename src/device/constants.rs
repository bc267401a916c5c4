use uuid::Uuid;

/**
 * How long (milliseconds) to wait after a scan request before asking the
 * driver to start scanning.
 */
pub const SCAN_START_DELAY: u64 = 1000;

/**
 * How long (milliseconds) a scan may keep running before the watchdog stops
 * it again. Zero disables the watchdog.
 */
pub const SCAN_DEADLINE: u64 = 30_000;

/**
 * How long (milliseconds) a connection attempt may stay unanswered before it
 * is reported as failed. Zero disables the watchdog.
 */
pub const CONNECT_DEADLINE: u64 = 10_000;

/**
 * The UUID of the remote GATT characteristic the light output value is
 * written to.
 */
pub const LIGHT_OUTPUT_CHARACTERISTIC: &str = "8c152d03-6b4e-4a3f-8f21-7c93d1a6e540";

pub const OUTPUT_ON: [u8; 1] = [0x01];
pub const OUTPUT_OFF: [u8; 1] = [0x00];

pub fn make_light_output_uuid() -> Uuid {
    Uuid::parse_str(LIGHT_OUTPUT_CHARACTERISTIC).unwrap()
}
