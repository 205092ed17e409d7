pub mod fixtures {
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};

    use parley_hub::HubEvent;

    pub fn root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("tests")
            .join("fixtures")
    }

    pub fn path(relative: impl AsRef<Path>) -> PathBuf {
        root().join(relative.as_ref())
    }

    pub fn read(relative: impl AsRef<Path>) -> io::Result<String> {
        fs::read_to_string(path(relative))
    }

    pub fn frame(name: &str) -> String {
        read_or_panic(Path::new("frames").join(name))
    }

    /// Decode a hub frame fixture.
    pub fn hub_event(name: &str) -> HubEvent {
        serde_json::from_str(&frame(name))
            .unwrap_or_else(|error| panic!("fixture {name} is not a hub event: {error}"))
    }

    pub fn config(name: &str) -> String {
        read_or_panic(Path::new("config").join(name))
    }

    fn read_or_panic(relative: impl AsRef<Path>) -> String {
        let relative = relative.as_ref();
        read(relative).unwrap_or_else(|error| {
            panic!(
                "failed to read fixture {}: {error}",
                relative.to_string_lossy()
            )
        })
    }
}

pub mod transport {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use parley_hub::{
        ConnectionError, HubCall, HubEvent, HubSignal, HubSignalReceiver, HubSignalSender,
        HubTransport, TransportEvent, signal_channel,
    };

    /// In-memory transport that records every call and lets tests inject
    /// inbound hub traffic.
    ///
    /// Handshakes succeed unless a failure has been scripted with
    /// [`ScriptedTransport::script_handshake`].
    pub struct ScriptedTransport {
        inbound: HubSignalSender,
        calls: Mutex<Vec<HubCall>>,
        handshakes: Mutex<VecDeque<Result<(), ConnectionError>>>,
        handshake_count: AtomicUsize,
        close_count: AtomicUsize,
        fail_invokes: AtomicBool,
    }

    impl ScriptedTransport {
        pub fn new(buffer: usize) -> (Arc<Self>, HubSignalReceiver) {
            let (inbound, receiver) = signal_channel(buffer);
            let transport = Arc::new(Self {
                inbound,
                calls: Mutex::new(Vec::new()),
                handshakes: Mutex::new(VecDeque::new()),
                handshake_count: AtomicUsize::new(0),
                close_count: AtomicUsize::new(0),
                fail_invokes: AtomicBool::new(false),
            });
            (transport, receiver)
        }

        pub fn script_handshake(&self, result: Result<(), ConnectionError>) {
            self.handshakes.lock().unwrap().push_back(result);
        }

        /// Make every subsequent `invoke` fail with a transport error.
        pub fn fail_invokes(&self, fail: bool) {
            self.fail_invokes.store(fail, Ordering::SeqCst);
        }

        pub fn calls(&self) -> Vec<HubCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_named(&self, method: &str) -> Vec<HubCall> {
            self.calls()
                .into_iter()
                .filter(|call| call.method_name() == method)
                .collect()
        }

        pub fn clear_calls(&self) {
            self.calls.lock().unwrap().clear();
        }

        pub fn handshake_count(&self) -> usize {
            self.handshake_count.load(Ordering::SeqCst)
        }

        pub fn close_count(&self) -> usize {
            self.close_count.load(Ordering::SeqCst)
        }

        pub async fn push_event(&self, event: HubEvent) {
            self.push(HubSignal::Event(event)).await;
        }

        pub async fn push_lifecycle(&self, event: TransportEvent) {
            self.push(HubSignal::Lifecycle(event)).await;
        }

        async fn push(&self, signal: HubSignal) {
            self.inbound
                .send(signal)
                .await
                .expect("inbound receiver dropped");
        }
    }

    impl HubTransport for ScriptedTransport {
        async fn handshake(&self) -> Result<(), ConnectionError> {
            self.handshake_count.fetch_add(1, Ordering::SeqCst);
            self.handshakes.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        async fn invoke(&self, call: HubCall) -> Result<(), ConnectionError> {
            self.calls.lock().unwrap().push(call);
            if self.fail_invokes.load(Ordering::SeqCst) {
                Err(ConnectionError::Transport("scripted invoke failure".to_string()))
            } else {
                Ok(())
            }
        }

        async fn close(&self) -> Result<(), ConnectionError> {
            self.close_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

pub use transport::ScriptedTransport;
