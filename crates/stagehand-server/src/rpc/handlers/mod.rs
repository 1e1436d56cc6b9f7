//! Built-in request handlers.

pub mod general;

use crate::rpc::dispatcher::RequestDispatcher;

/// Register every built-in request type.
///
/// `GetVersion` is registered last so its `availableRequests` list covers
/// every handler added before this call, including host-provided ones.
pub fn register_all(dispatcher: &mut RequestDispatcher) {
    dispatcher.register("GetStats", general::GetStatsHandler);
    dispatcher.register("BroadcastCustomEvent", general::BroadcastCustomEventHandler);
    dispatcher.register("Sleep", general::SleepHandler);

    let mut available_requests = dispatcher.request_types();
    available_requests.push("GetVersion".to_owned());
    available_requests.sort();
    dispatcher.register("GetVersion", general::GetVersionHandler::new(available_requests));
}

/// Shared fixtures for handler, batch and protocol tests.
#[cfg(test)]
pub mod test_helpers {
    use std::sync::Arc;

    use stagehand_core::Session;

    use crate::rpc::context::{RequestContext, ServiceContext};
    use crate::tick::TickSource;
    use crate::websocket::registry::SessionRegistry;

    /// Services with an empty registry and no tick source.
    pub fn make_test_services() -> Arc<ServiceContext> {
        Arc::new(ServiceContext::new(Arc::new(SessionRegistry::new(None)), None))
    }

    /// Services backed by `tick_source`.
    pub fn make_test_services_with_ticks(tick_source: Arc<dyn TickSource>) -> Arc<ServiceContext> {
        Arc::new(ServiceContext::new(
            Arc::new(SessionRegistry::new(None)),
            Some(tick_source),
        ))
    }

    /// A request context for an identified, unregistered session.
    pub fn make_test_context() -> RequestContext {
        make_test_context_with(make_test_services())
    }

    /// A request context for an identified session on `services`.
    pub fn make_test_context_with(services: Arc<ServiceContext>) -> RequestContext {
        let session = Arc::new(Session::new("127.0.0.1:40000"));
        session.mark_identified();
        RequestContext::new(session, services)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::handlers::test_helpers::make_test_context;
    use stagehand_core::{ExecutionType, Request, RequestStatus};

    #[test]
    fn every_registered_type_resolves() {
        let ctx = make_test_context();
        let mut dispatcher = RequestDispatcher::new();
        register_all(&mut dispatcher);

        for request_type in dispatcher.request_types() {
            let request = Request::new(request_type.as_str(), None, ExecutionType::None);
            let result = dispatcher.process_request(&request, &ctx);
            assert_ne!(
                result.status,
                RequestStatus::UnknownRequestType,
                "{request_type} did not resolve"
            );
        }
    }

    #[test]
    fn get_version_lists_itself() {
        let mut dispatcher = RequestDispatcher::new();
        register_all(&mut dispatcher);
        assert_eq!(
            dispatcher.request_types(),
            vec!["BroadcastCustomEvent", "GetStats", "GetVersion", "Sleep"]
        );
    }
}
