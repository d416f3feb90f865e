//! Backend bindings.
//!
//! Once a backend handle is ready, a binding subscribes to its re-emitted
//! synced events and applies the corresponding local mutation. This is the
//! sole mechanism for realtime fan-out to the client: remote create/update/
//! delete arrive here, outside any user-initiated call.
//!
//! Bindings are composition methods on [`Model`] and [`Collection`] rather
//! than injected base-type behavior; binding is explicit and awaitable.

use crate::collection::Collection;
use crate::model::Model;
use crate::sync::{SyncError, SyncOptions};
use tracing::{debug, warn};

impl Collection {
    /// Subscribe this collection to its backend's synced events.
    ///
    /// Waits for the backend's readiness, then applies pushes:
    /// `<event>:create` adds a member, `<event>:update` merges into the
    /// member matching the identity attribute (no-op when absent),
    /// `<event>:delete` removes the matching member (no-op when absent).
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NoBackend` when the collection has no backend
    /// configuration.
    pub async fn bind_backend(&self) -> Result<(), SyncError> {
        let Some(backend) = crate::sync::Persistable::backend(self) else {
            return Err(SyncError::NoBackend);
        };

        let ready = backend.ready().await;
        let event = ready.options.event;
        debug!(backend = %backend.name(), event = %event, "Binding collection");

        let target = self.clone();
        self.bind(format!("{}:create", event), move |args| {
            let Some(attributes) = args.first() else {
                return;
            };
            target.add(attributes.clone());
        });

        let target = self.clone();
        let id_attribute = self.id_attribute().to_string();
        self.bind(format!("{}:update", event), move |args| {
            let Some(attributes) = args.first() else {
                return;
            };
            let Some(id) = attributes.get(&id_attribute) else {
                return;
            };
            if let Some(member) = target.get(id) {
                member.set(attributes);
            }
        });

        let target = self.clone();
        let id_attribute = self.id_attribute().to_string();
        self.bind(format!("{}:delete", event), move |args| {
            let Some(attributes) = args.first() else {
                return;
            };
            if let Some(id) = attributes.get(&id_attribute) {
                target.remove(id);
            }
        });

        Ok(())
    }
}

impl Model {
    /// Subscribe this model to its backend's synced events.
    ///
    /// Waits for the backend's readiness, then applies pushes:
    /// `<event>:create` persists the pushed attributes as if newly saved,
    /// `<event>:update` merges them, `<event>:delete` destroys the model
    /// unconditionally, ignoring the payload.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NoBackend` when the model carries no backend of
    /// its own. A delegated handle re-emits on the delegating collection,
    /// not on this model, so it cannot be bound here.
    pub async fn bind_backend(&self) -> Result<(), SyncError> {
        let Some(backend) = self.own_backend() else {
            return Err(SyncError::NoBackend);
        };

        let ready = backend.ready().await;
        let event = ready.options.event;
        debug!(backend = %backend.name(), event = %event, "Binding model");

        let target = self.clone();
        self.bind(format!("{}:create", event), move |args| {
            let Some(attributes) = args.first() else {
                return;
            };
            target.set(attributes);
            if let Err(e) = target.save(SyncOptions::default()) {
                warn!(error = %e, "Pushed create could not be persisted");
            }
        });

        let target = self.clone();
        self.bind(format!("{}:update", event), move |args| {
            if let Some(attributes) = args.first() {
                target.set(attributes);
            }
        });

        let target = self.clone();
        self.bind(format!("{}:delete", event), move |_| {
            if let Err(e) = target.destroy(SyncOptions::default()) {
                warn!(error = %e, "Pushed delete could not be propagated");
            }
        });

        Ok(())
    }
}
