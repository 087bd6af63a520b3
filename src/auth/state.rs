//! Authentication state trait.

use super::gate::AuthGate;

/// Trait for state types that can authenticate requests.
pub trait HasAuthGate {
    fn gate(&self) -> &AuthGate;
}

/// Implement `HasAuthGate` for a state struct with a `gate: AuthGate` field.
#[macro_export]
macro_rules! impl_has_auth_gate {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthGate for $state_type {
            fn gate(&self) -> &$crate::auth::AuthGate {
                &self.gate
            }
        }
    };
}
