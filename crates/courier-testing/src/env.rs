//! Pre-wired dispatcher for integration tests.

use std::sync::Arc;

use courier_dispatch::{Dispatcher, DispatcherConfig, NoJitter, SeededJitter};

use crate::{events::RecordingHandler, transport::{DeliveryScript, MockTransport}};

/// A dispatcher wired with a [`MockTransport`], a [`RecordingHandler`], and
/// deterministic jitter.
pub struct TestDispatcher {
    /// The dispatcher under test.
    pub dispatcher: Dispatcher,
    /// The transport double receiving every delivery attempt.
    pub transport: Arc<MockTransport>,
    /// Recorder receiving every observer event.
    pub events: Arc<RecordingHandler>,
}

impl TestDispatcher {
    /// Starts building a test dispatcher.
    pub fn builder() -> TestDispatcherBuilder {
        TestDispatcherBuilder::default()
    }

    /// Dispatcher with default config and an always-succeeding transport.
    pub fn succeeding() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`TestDispatcher`].
pub struct TestDispatcherBuilder {
    config: DispatcherConfig,
    script: DeliveryScript,
    jitter_seed: Option<u64>,
}

impl Default for TestDispatcherBuilder {
    fn default() -> Self {
        Self { config: DispatcherConfig::default(), script: DeliveryScript::Succeed, jitter_seed: None }
    }
}

impl TestDispatcherBuilder {
    /// Overrides the dispatcher configuration.
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Scripts the transport outcomes.
    pub fn script(mut self, script: DeliveryScript) -> Self {
        self.script = script;
        self
    }

    /// Uses seeded jitter instead of the default zero jitter.
    pub fn jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    /// Builds and spawns the dispatcher. Must run inside a tokio runtime.
    pub fn build(self) -> TestDispatcher {
        let transport = Arc::new(MockTransport::new(self.script));
        let events = Arc::new(RecordingHandler::new());

        let builder = Dispatcher::builder(transport.clone()).config(self.config).events(events.clone());
        let builder = match self.jitter_seed {
            Some(seed) => builder.jitter(Arc::new(SeededJitter::new(seed))),
            None => builder.jitter(Arc::new(NoJitter)),
        };

        TestDispatcher { dispatcher: builder.build(), transport, events }
    }
}
