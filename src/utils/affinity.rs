// ============================================================================
// CPU Affinity
// Keeps the matching thread on one core so its book stays cache-hot
// ============================================================================

/// Pin the current thread to a specific CPU core.
///
/// Returns `false` if the core does not exist or pinning failed.
#[cfg(feature = "numa")]
pub fn pin_current_thread(core_id: usize) -> bool {
    core_affinity::get_core_ids()
        .unwrap_or_default()
        .into_iter()
        .find(|id| id.id == core_id)
        .map(core_affinity::set_for_current)
        .unwrap_or(false)
}

/// Get all available core IDs on this system.
#[cfg(feature = "numa")]
pub fn available_cores() -> Vec<usize> {
    core_affinity::get_core_ids()
        .unwrap_or_default()
        .into_iter()
        .map(|id| id.id)
        .collect()
}

// ============================================================================
// Stub implementations when numa feature is disabled
// ============================================================================

#[cfg(not(feature = "numa"))]
pub fn pin_current_thread(_core_id: usize) -> bool {
    false
}

#[cfg(not(feature = "numa"))]
pub fn available_cores() -> Vec<usize> {
    let count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (0..count).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_cores_not_empty() {
        assert!(!available_cores().is_empty());
    }

    #[test]
    fn test_pin_to_missing_core_fails() {
        assert!(!pin_current_thread(usize::MAX));
    }

    #[cfg(feature = "numa")]
    #[test]
    fn test_pin_to_first_core() {
        let cores = available_cores();
        std::thread::spawn(move || assert!(pin_current_thread(cores[0])))
            .join()
            .unwrap();
    }
}
