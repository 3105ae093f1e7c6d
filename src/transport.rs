use crate::Result;

/// Outbound message path consumed by the dialog state machine and the
/// proxy engine.
///
/// The core never opens sockets; the embedding stack implements this
/// trait on top of its UDP/TCP/TLS layer. Sends may suspend the caller
/// but report success or failure synchronously from the state machine's
/// point of view.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a request toward its Request-URI (or first Route).
    async fn send_request(&self, request: rsip::Request) -> Result<()>;

    /// Retransmit a previously sent request, typically a stored ACK
    /// answering a repeated 2xx.
    async fn resend_request(&self, request: rsip::Request) -> Result<()>;

    /// Send a response along its Via path.
    async fn send_response(&self, response: rsip::Response) -> Result<()>;

    /// Prepend this hop's Via header to the request.
    fn add_via(&self, request: rsip::Request) -> rsip::Request;

    /// Whether the URI points back at one of this application's own
    /// listening addresses.
    fn is_local(&self, app_id: &str, uri: &rsip::Uri) -> bool;
}
