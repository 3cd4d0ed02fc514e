pub mod queue;
pub mod quota;

use pkg_state::client::ObjectStore;
use tracing::info;

/// Shared dependencies handed to every controller at startup.
#[derive(Clone)]
pub struct ControllerContext {
    pub store: ObjectStore,
    /// Reconcile worker pool size per controller.
    pub workers: usize,
}

type SetupFn = fn(&ControllerContext) -> tokio::task::JoinHandle<()>;

/// Instance-owned registry of controller setup functions.
///
/// Controllers are registered explicitly during process bootstrap and
/// started together; there is no package-level mutable map populated by
/// import side effects.
#[derive(Default)]
pub struct ControllerRegistry {
    setups: Vec<(&'static str, SetupFn)>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, setup: SetupFn) {
        self.setups.push((name, setup));
    }

    /// Start every registered controller, returning their task handles.
    pub fn start_all(&self, ctx: &ControllerContext) -> Vec<tokio::task::JoinHandle<()>> {
        self.setups
            .iter()
            .map(|(name, setup)| {
                info!("Starting controller {}", name);
                setup(ctx)
            })
            .collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.setups.iter().map(|(name, _)| *name).collect()
    }
}
