use std::sync::{PoisonError, RwLock};

use crate::models::Actor;

/// Supplies the identity of whoever is acting right now.
/// `None` means signed out; callers get `ForumError::AuthRequired`.
pub trait IdentityProvider: Send + Sync {
    fn current_actor(&self) -> Option<Actor>;
}

/// Identity held in memory for the lifetime of a session.
#[derive(Default)]
pub struct SessionIdentity {
    actor: RwLock<Option<Actor>>,
}

impl SessionIdentity {
    pub fn new() -> Self { Self::default() }

    pub fn signed_in(actor: Actor) -> Self {
        Self { actor: RwLock::new(Some(actor)) }
    }

    pub fn sign_in(&self, actor: Actor) {
        *self.actor.write().unwrap_or_else(PoisonError::into_inner) = Some(actor);
    }

    pub fn sign_out(&self) {
        *self.actor.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_actor(&self) -> Option<Actor> {
        self.actor.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
