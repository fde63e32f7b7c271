use tracing::warn;

use crate::{load_entry, VultenInstance};

/// Device backed tests are skipped on machines without a loader or device.
pub fn get_test_instance() -> Option<VultenInstance> {
    let dev_num: Option<usize> = match std::env::var("VULTEN_TEST_DEV") {
        Ok(val) => Some(val.parse().unwrap_or_default()),
        Err(_) => None,
    };

    let entry = match load_entry() {
        Ok(entry) => entry,
        Err(e) => {
            warn!("Skipping device tests, no Vulkan loader: {e}");
            return None;
        }
    };

    match VultenInstance::new(entry, dev_num) {
        Ok(inst) => Some(inst),
        Err(e) => {
            warn!("Skipping device tests: {e}");
            None
        }
    }
}

