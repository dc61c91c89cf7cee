use std::thread::{self, JoinHandle};

use px16_common::dev_info;

/// Launches the simulated second core of a chip (and any helper
/// workers) and joins them at teardown. Mirrors the two-core split of
/// the real parts: core 0 is the caller's main loop, core 1 runs the
/// heavy worker.
pub struct CoreManager {
    threads: Vec<JoinHandle<()>>,
}

impl CoreManager {
    pub fn new() -> Self {
        CoreManager {
            threads: Vec::new(),
        }
    }

    pub fn launch<F>(&mut self, name: &str, entry: F)
    where
        F: FnOnce() + Send + 'static,
    {
        dev_info!("core_manager: launching {}", name);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(entry)
            .expect("core thread spawn failed");
        self.threads.push(handle);
    }

    pub fn join(self) {
        for handle in self.threads {
            let _ = handle.join();
        }
    }
}

impl Default for CoreManager {
    fn default() -> Self {
        CoreManager::new()
    }
}
