//! Request handler for processing client requests.

use tracing::{error, info};

use kvstore_core::{KvService, Subscription};
use kvstore_proto::{error_codes, Operation, Request, Response};

use crate::error::Error;

/// Dispatches decoded requests to the key-value service.
///
/// `Get`, `Set` and `Ping` produce a single response. `Subscribe` is turned
/// into a [`Subscription`] that the transport streams from.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    service: KvService,
}

impl RequestHandler {
    /// Create a handler over `service`.
    pub fn new(service: KvService) -> Self {
        Self { service }
    }

    /// The service requests are dispatched to.
    pub fn service(&self) -> &KvService {
        &self.service
    }

    /// Handle a unary request and return its response.
    pub fn handle(&self, request: &Request) -> Response {
        let method = request.operation.name();
        info!(method, request_id = request.id, "request received");

        match self.handle_inner(request) {
            Ok(response) => {
                info!(method, request_id = request.id, "request completed");
                response
            }
            Err(e) => {
                error!(method, request_id = request.id, error = %e, "request failed");
                Self::error_response(request.id, &e)
            }
        }
    }

    fn handle_inner(&self, request: &Request) -> Result<Response, Error> {
        match &request.operation {
            Operation::Get { key } => {
                let value = self.service.get(key)?;
                Ok(Response::value(request.id, value))
            }
            Operation::Set { key, value } => {
                let outcome = self.service.set(key, value)?;
                Ok(Response::stored(request.id, outcome.success, outcome.message))
            }
            Operation::Ping => Ok(Response::pong(request.id)),
            Operation::Subscribe { .. } => Err(Error::Transport(
                "subscribe requires a streaming connection".to_string(),
            )),
        }
    }

    /// Register a subscription for a `Subscribe` request.
    ///
    /// On failure the returned response should be sent back to the caller.
    pub fn subscribe(&self, request_id: u64, prefix: &str) -> Result<Subscription, Response> {
        info!(method = "Subscribe", request_id, prefix, "request received");

        self.service.subscribe(prefix).map_err(|e| {
            let e = Error::from(e);
            error!(method = "Subscribe", request_id, error = %e, "request failed");
            Self::error_response(request_id, &e)
        })
    }

    /// Map an error onto a wire error response.
    pub fn error_response(request_id: u64, error: &Error) -> Response {
        let code = match error {
            Error::Core(kvstore_core::Error::InvalidArgument(_)) => error_codes::INVALID_ARGUMENT,
            Error::Core(kvstore_core::Error::Unavailable(_)) => error_codes::UNAVAILABLE,
            Error::Protocol(_) => error_codes::PROTOCOL,
            _ => error_codes::INTERNAL,
        };

        let message = match error {
            Error::Core(kvstore_core::Error::InvalidArgument(msg)) => msg.clone(),
            Error::Core(kvstore_core::Error::Internal(_)) => "internal storage error".to_string(),
            other => other.to_string(),
        };

        Response::error(request_id, code, message)
    }
}
