//! Reserved response-code space shared by every handler.
//!
//! The first six codes are claimed by the runtime and are stable across
//! deployments; handlers allocate their domain-specific codes starting at
//! [`FIRST_HANDLER_CODE`]. A response frame carries the code as a `u16`
//! immediately after the length prefix.

/// Wire representation of a request outcome.
pub type ResponseCode = u16;

/// The request completed; output parameters follow in the response payload.
pub const SUCCESS: ResponseCode = 0;

/// The request hit a serialization conflict; the transport should re-queue
/// the same frame for another attempt.
pub const RETRY_LATER: ResponseCode = 1;

/// The request failed inside the server (commit failure or an error escaping
/// the handler); no output payload.
pub const SERVER_ERROR: ResponseCode = 2;

/// No handler is registered under the request's `(category, method)` for the
/// connection's authentication state.
pub const INVALID_REQUEST_TYPE: ResponseCode = 3;

/// The request payload was malformed or failed input validation.
pub const INVALID_PARAMETERS: ResponseCode = 4;

/// The handler chose to suppress the reply frame entirely.
pub const NO_RESPONSE: ResponseCode = 5;

/// First code available to handler-defined domain errors.
pub const FIRST_HANDLER_CODE: ResponseCode = 6;
