//! Server panel controller.
//!
//! Owns the subscription registry of one screen and the attach/detach
//! lifecycle, and routes command outcomes and user-name updates to the view.

use crate::engine::CommandDispatcher;
use crate::error::{DispatchError, StoreError};
use crate::model::{Command, Outcome};
use crate::registry::{DeliveryQueue, Subscription, SubscriptionRegistry};
use crate::user_name::UserNameSource;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error};

/// What a screen needs to render the panel. All methods run on the consumer
/// context that drains the panel's [`DeliveryQueue`].
pub(crate) trait PanelView: 'static {
    fn show_status(&mut self, command: Command, outcome: &Outcome);
    fn show_user_name(&mut self, name: &str);
    fn user_name_saved(&mut self);
    fn user_name_failed(&mut self, error: &StoreError);
}

pub(crate) struct ServerPanel<V> {
    dispatcher: Arc<CommandDispatcher>,
    user_name: Arc<dyn UserNameSource>,
    registry: SubscriptionRegistry<V>,
    attached: bool,
}

impl<V: PanelView> ServerPanel<V> {
    pub fn new(
        dispatcher: Arc<CommandDispatcher>,
        user_name: Arc<dyn UserNameSource>,
        runtime: Handle,
    ) -> (Self, DeliveryQueue<V>) {
        let (registry, queue) = SubscriptionRegistry::with_runtime(runtime);
        (
            Self {
                dispatcher,
                user_name,
                registry,
                attached: false,
            },
            queue,
        )
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Start observing the user name. No-op when already attached.
    pub fn attach(&mut self) {
        if self.attached {
            return;
        }
        self.registry.add_stream(
            self.user_name.observe(),
            |view: &mut V, name| view.show_user_name(&name),
            |_view: &mut V, e: StoreError| error!(error = %e, "unable to get user name"),
        );
        self.attached = true;
        debug!("panel attached");
    }

    /// Cancel everything this panel started. Nothing started before this
    /// call reaches the view afterwards.
    pub fn detach(&mut self) {
        self.registry.cancel_all();
        self.attached = false;
        debug!("panel detached");
    }

    fn issue(&self, command: Command) -> Subscription {
        self.registry.add(
            self.dispatcher.issue(command),
            move |view: &mut V, outcome| view.show_status(command, &outcome),
            move |view: &mut V, e: DispatchError| {
                view.show_status(command, &Outcome::failure(e.to_string()))
            },
        )
    }

    pub fn refresh_status(&self) -> Subscription {
        self.issue(Command::HealthCheck)
    }

    pub fn start_server(&self) -> Subscription {
        self.issue(Command::Start)
    }

    pub fn stop_server(&self) -> Subscription {
        self.issue(Command::Stop)
    }

    pub fn update_user_name(&self, name: String) -> Subscription {
        self.registry.add(
            self.user_name.update(name),
            |view: &mut V, ()| view.user_name_saved(),
            |view: &mut V, e| {
                error!(error = %e, "unable to update user name");
                view.user_name_failed(&e);
            },
        )
    }

    /// Cancel one subscription started by this panel, e.g. a pending update.
    pub fn cancel(&self, subscription: &Subscription) -> bool {
        self.registry.cancel(subscription)
    }

    /// Live subscriptions, the user-name observation included.
    pub fn pending(&self) -> usize {
        self.registry.live_count()
    }
}
