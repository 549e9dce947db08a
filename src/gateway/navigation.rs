use std::sync::{Arc, Weak};

use super::SignalBinding;
use crate::platform::{
    NavigationRequest, PlatformError, PolicyDecision, PolicyKind, ViewId, WindowSystem,
};
use crate::runtime::{ManagedRuntime, ManagedValue, RuntimeBinding};
use crate::view::Lifecycle;

/// Asks the caller's navigation listener whether a navigation may proceed.
///
/// Fails closed: anything other than an explicit `true` ignores the request.
pub struct NavigationGateway<R: ManagedRuntime> {
    binding: SignalBinding<R>,
}

impl<R: ManagedRuntime> NavigationGateway<R> {
    pub fn new(runtime: Arc<R>, lifecycle: Arc<Lifecycle>) -> Arc<Self> {
        Arc::new(Self {
            binding: SignalBinding::new(runtime, lifecycle),
        })
    }

    pub fn install(
        self: &Arc<Self>,
        ws: &dyn WindowSystem,
        view: ViewId,
    ) -> Result<(), PlatformError> {
        let gateway: Weak<Self> = Arc::downgrade(self);
        self.binding.connect(ws, view, || {
            ws.connect_navigation(
                view,
                Box::new(move |request: &NavigationRequest| {
                    gateway.upgrade().and_then(|gateway| gateway.decide(request))
                }),
            )
        })
    }

    pub fn uninstall(&self, ws: &dyn WindowSystem) {
        self.binding.disconnect(ws);
    }

    pub fn is_installed(&self) -> bool {
        self.binding.is_connected()
    }

    pub fn set_listener(&self, listener: Option<R::Listener>) {
        self.binding.set_listener(listener);
    }

    pub fn clear_listener(&self) {
        self.binding.slot().clear();
    }

    pub fn has_listener(&self) -> bool {
        self.binding.slot().is_set()
    }

    /// Returns `None` when the request is left to the default policy.
    pub fn decide(&self, request: &NavigationRequest) -> Option<PolicyDecision> {
        if self.binding.is_closing() {
            return Some(PolicyDecision::Ignore);
        }
        if request.kind != PolicyKind::Navigation {
            return None;
        }
        let registration = self.binding.slot().get()?;

        let arg = ManagedValue::Str(request.uri.clone().unwrap_or_default());
        let allowed = match RuntimeBinding::acquire(self.binding.runtime()) {
            Ok(binding) => match registration.call(&binding, arg) {
                Ok(ManagedValue::Bool(true)) => true,
                Ok(answer) => {
                    tracing::debug!(
                        target = "navigation",
                        ?answer,
                        shape = ?registration.shape(),
                        uri = ?request.uri,
                        "navigation denied"
                    );
                    false
                }
                Err(err) => {
                    tracing::warn!(
                        target = "navigation",
                        error = %err,
                        uri = ?request.uri,
                        "listener failed; denying"
                    );
                    false
                }
            },
            Err(err) => {
                tracing::warn!(target = "navigation", error = %err, "no runtime binding; denying");
                false
            }
        };

        Some(if allowed {
            PolicyDecision::Use
        } else {
            PolicyDecision::Ignore
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::local::{LocalListener, LocalRuntime};
    use parking_lot::Mutex;

    fn gateway() -> (Arc<LocalRuntime>, Arc<Lifecycle>, Arc<NavigationGateway<LocalRuntime>>) {
        let runtime = Arc::new(LocalRuntime::new());
        let lifecycle = Arc::new(Lifecycle::new());
        let gateway = NavigationGateway::new(runtime.clone(), lifecycle.clone());
        (runtime, lifecycle, gateway)
    }

    fn answering(value: ManagedValue) -> LocalListener {
        LocalListener::function(move |_| value.clone())
    }

    #[test]
    fn only_explicit_true_allows() {
        let (_, _, gateway) = gateway();
        let request = NavigationRequest::navigation("https://example.com");
        let cases = [
            (ManagedValue::Bool(true), PolicyDecision::Use),
            (ManagedValue::Bool(false), PolicyDecision::Ignore),
            (ManagedValue::Null, PolicyDecision::Ignore),
            (ManagedValue::Str("true".into()), PolicyDecision::Ignore),
            (ManagedValue::Object, PolicyDecision::Ignore),
        ];
        for (answer, expected) in cases {
            gateway.set_listener(Some(answering(answer)));
            assert_eq!(gateway.decide(&request), Some(expected));
        }
    }

    #[test]
    fn listener_sees_the_url() {
        let (_, _, gateway) = gateway();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        gateway.set_listener(Some(LocalListener::function(move |value| {
            *sink.lock() = Some(value);
            ManagedValue::Bool(true)
        })));
        gateway.decide(&NavigationRequest::navigation("https://example.com/a"));
        assert_eq!(
            *seen.lock(),
            Some(ManagedValue::Str("https://example.com/a".into()))
        );
    }

    #[test]
    fn missing_uri_is_passed_as_empty_string() {
        let (_, _, gateway) = gateway();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        gateway.set_listener(Some(LocalListener::function(move |value| {
            *sink.lock() = Some(value);
            ManagedValue::Bool(true)
        })));
        let request = NavigationRequest {
            uri: None,
            kind: PolicyKind::Navigation,
        };
        assert_eq!(gateway.decide(&request), Some(PolicyDecision::Use));
        assert_eq!(*seen.lock(), Some(ManagedValue::Str(String::new())));
    }

    #[test]
    fn closing_view_ignores_even_with_allowing_listener() {
        let (runtime, lifecycle, gateway) = gateway();
        gateway.set_listener(Some(answering(ManagedValue::Bool(true))));
        assert!(lifecycle.begin_close());
        assert_eq!(
            gateway.decide(&NavigationRequest::navigation("https://example.com")),
            Some(PolicyDecision::Ignore)
        );
        assert_eq!(runtime.invocation_count(), 0);
    }

    #[test]
    fn without_listener_default_policy_applies() {
        let (_, _, gateway) = gateway();
        assert_eq!(
            gateway.decide(&NavigationRequest::navigation("https://example.com")),
            None
        );
    }

    #[test]
    fn other_policy_kinds_are_not_forwarded() {
        let (runtime, _, gateway) = gateway();
        gateway.set_listener(Some(answering(ManagedValue::Bool(false))));
        let request = NavigationRequest {
            uri: Some("https://example.com/file.zip".into()),
            kind: PolicyKind::Response,
        };
        assert_eq!(gateway.decide(&request), None);
        assert_eq!(runtime.invocation_count(), 0);
    }

    #[test]
    fn binding_failure_denies() {
        let (runtime, _, gateway) = gateway();
        gateway.set_listener(Some(answering(ManagedValue::Bool(true))));
        runtime.fail_attach(true);
        assert_eq!(
            gateway.decide(&NavigationRequest::navigation("https://example.com")),
            Some(PolicyDecision::Ignore)
        );
    }
}
