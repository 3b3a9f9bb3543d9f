//! Mock construction helpers

use labdaq::backend::{DaqBackend, FrontendReceiver, MockHandle, MockTransport};
use labdaq::config::AppConfig;
use labdaq::FramedLine;
use crossbeam_channel::Receiver;
use std::thread::JoinHandle;

/// A backend running on a mock transport
pub struct MockRig {
    pub frontend: FrontendReceiver,
    pub device: MockHandle,
    worker: Option<JoinHandle<()>>,
}

impl MockRig {
    /// Spawn the backend thread; the channel is not opened yet
    pub fn spawn(config: AppConfig) -> Self {
        let (transport, device) = MockTransport::new();
        let (backend, frontend) = DaqBackend::with_transport(config, Box::new(transport));
        let worker = std::thread::spawn(move || backend.run());
        Self {
            frontend,
            device,
            worker: Some(worker),
        }
    }

    /// Spawn and connect
    pub fn connected(config: AppConfig) -> Self {
        let rig = Self::spawn(config);
        rig.frontend.connect().expect("mock connect");
        rig
    }

    /// Spawn, subscribe to lines, then connect
    ///
    /// Subscribing first guarantees no line is framed before the
    /// subscription exists.
    pub fn connected_with_lines(config: AppConfig) -> (Self, Receiver<FramedLine>) {
        let rig = Self::spawn(config);
        let lines = rig.frontend.subscribe_lines();
        rig.frontend.connect().expect("mock connect");
        (rig, lines)
    }

    /// Shut the backend down and wait for the thread
    pub fn shutdown(mut self) {
        self.frontend.shutdown();
        if let Some(worker) = self.worker.take() {
            worker.join().expect("backend thread exits cleanly");
        }
    }
}

impl Drop for MockRig {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.frontend.shutdown();
            let _ = worker.join();
        }
    }
}
