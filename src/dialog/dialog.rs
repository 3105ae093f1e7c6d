use std::fmt;
use std::time::SystemTime;

use rsip::prelude::{HeadersExt, ToTypedHeader, UntypedHeader};
use rsip::Header;
use tracing::{debug, warn};

use super::DialogId;
use crate::rsip_ext::extract_uri_from_contact;

/// SIP dialog state as it advances through the INVITE lifecycle.
///
/// The states follow the RFC 3261 dialog state machine, split by role
/// for the window between a final answer and its ACK.
///
/// * `Init` - dialog just created from the first response
/// * `ProceedingUac` / `ProceedingUas` - provisional answer seen (early dialog)
/// * `AcceptedUac` / `AcceptedUas` - 2xx seen, ACK still outstanding
/// * `Confirmed` - 2xx acknowledged, dialog established
/// * `Bye` - a BYE is in flight
/// * `Terminated` - final state, the record is dropped from the store
///
/// ```text
/// UAC (Caller)                 UAS (Receiver)
///     |--- INVITE ----------->|    // request to establish a session
///     |<--- 180 Ringing ------|    // ProceedingUac (early dialog)
///     |<--- 200 OK -----------|    // AcceptedUac
///     |--- ACK -------------->|    // Confirmed
///     |--- BYE -------------->|    // Bye
///     |<--- 200 OK -----------|    // Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    Init,
    ProceedingUac,
    ProceedingUas,
    AcceptedUac,
    AcceptedUas,
    Confirmed,
    Bye,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminatedReason {
    /// Terminated by a status code (timeout 408, lost dialog 481,
    /// rejected INVITE, failed ACK retransmit 503, ...).
    Code(u16),
    /// The side that created the dialog sent BYE.
    UacBye,
    /// The remote side sent BYE.
    UasBye,
}

/// One RFC 3261 §12 dialog, owned by its Call.
///
/// This is a plain record: the state machine takes it out of the
/// store, advances it and swaps it back in, so readers never observe a
/// half-applied transition.
#[derive(Debug, Clone)]
pub struct Dialog {
    pub id: DialogId,
    pub app_id: String,
    pub call_id: String,
    pub state: DialogState,
    /// Last CSeq used for locally originated requests, 0 when none was
    /// assigned yet. Never decreases.
    pub local_seq: u32,
    /// Last CSeq observed from the remote side.
    pub remote_seq: u32,
    pub local_uri: rsip::Uri,
    pub remote_uri: rsip::Uri,
    pub local_tag: String,
    /// Our Contact.
    pub local_target: rsip::Uri,
    /// Where in-dialog requests go (remote Contact, RFC 3261 §12.2.1.2).
    pub remote_target: rsip::Uri,
    pub route_set: Vec<rsip::headers::Route>,
    /// Latest INVITE of this dialog, kept for ACK construction and
    /// retransmission matching.
    pub request: Option<rsip::Request>,
    /// Latest INVITE response.
    pub response: Option<rsip::Response>,
    /// Last ACK we sent for the current INVITE; replayed verbatim when
    /// the 2xx is retransmitted.
    pub ack: Option<rsip::Request>,
    /// When the first 2xx arrived.
    pub answered: Option<SystemTime>,
    pub early: bool,
    pub secure: bool,
    pub terminated_reason: Option<TerminatedReason>,
    pub created: SystemTime,
    pub updated: SystemTime,
    pub local_sdp: Option<Vec<u8>>,
    pub remote_sdp: Option<Vec<u8>>,
    /// Via sent-by values seen on responses, for dialog-level
    /// authorization of the remote endpoints.
    pub remote_endpoints: Vec<String>,
}

impl Dialog {
    /// Build a UAC-side dialog from the INVITE we sent and the first
    /// response that carried a To-tag.
    pub fn new_uac(
        app_id: &str,
        request: &rsip::Request,
        response: &rsip::Response,
    ) -> crate::Result<Dialog> {
        let id = DialogId::from_pair(request, response)?;

        let from = request.from_header()?.typed()?;
        let to = request.to_header()?.typed()?;
        let local_tag = id.from_tag.clone();

        let local_target = match request.contact_header() {
            Ok(contact) => extract_uri_from_contact(contact.value())?,
            Err(_) => from.uri.clone(),
        };
        let remote_target = response
            .contact_header()
            .ok()
            .and_then(|c| extract_uri_from_contact(c.value()).ok())
            .unwrap_or_else(|| request.uri.clone());

        let route_set = route_set_from_response(response);
        let secure = matches!(request.uri.scheme, Some(rsip::Scheme::Sips));
        let local_seq = request.cseq_header()?.seq()?;
        let now = SystemTime::now();

        Ok(Dialog {
            id,
            app_id: app_id.to_string(),
            call_id: request.call_id_header()?.value().to_string(),
            state: DialogState::Init,
            local_seq,
            remote_seq: 0,
            local_uri: from.uri,
            remote_uri: to.uri,
            local_tag,
            local_target,
            remote_target,
            route_set,
            request: Some(request.clone()),
            response: None,
            ack: None,
            answered: None,
            early: true,
            secure,
            terminated_reason: None,
            created: now,
            updated: now,
            local_sdp: (!request.body.is_empty()).then(|| request.body.clone()),
            remote_sdp: None,
            remote_endpoints: Vec::new(),
        })
    }

    /// The remote side's tag, whichever slot of the id it occupies.
    pub fn remote_tag(&self) -> &str {
        if self.id.from_tag == self.local_tag {
            &self.id.to_tag
        } else {
            &self.id.from_tag
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state == DialogState::Terminated
    }

    /// Advance the dialog state. `Terminated` is final: transitions out
    /// of it are refused.
    pub fn transition(&mut self, state: DialogState) {
        if self.is_terminated() {
            warn!("dialog {} already terminated, ignoring {}", self.id, state);
            return;
        }
        debug!("dialog {} state: {} -> {}", self.id, self.state, state);
        self.state = state;
        self.updated = SystemTime::now();
    }

    pub fn terminate(&mut self, reason: TerminatedReason) {
        if self.is_terminated() {
            return;
        }
        self.terminated_reason = Some(reason);
        self.transition(DialogState::Terminated);
    }

    /// Refresh the remote target, route set and remote session body
    /// from a response (RFC 3261 §12.2.1.2 target refresh).
    pub fn target_refresh(&mut self, response: &rsip::Response) {
        if let Some(uri) = response
            .contact_header()
            .ok()
            .and_then(|c| extract_uri_from_contact(c.value()).ok())
        {
            self.remote_target = uri;
        }
        let routes = route_set_from_response(response);
        if !routes.is_empty() {
            self.route_set = routes;
        }
        if !response.body.is_empty() {
            self.remote_sdp = Some(response.body.clone());
        }
    }

    /// Record the sent-by of the response's top Via, deduplicated.
    pub fn record_remote_endpoint(&mut self, response: &rsip::Response) {
        if let Ok(via) = response.via_header() {
            let sent_by = via.value().to_string();
            if !self.remote_endpoints.contains(&sent_by) {
                self.remote_endpoints.push(sent_by);
            }
        }
    }
}

/// Route set for the UAC: Record-Route headers of the response, in
/// reverse order (RFC 3261 §12.1.2).
fn route_set_from_response(response: &rsip::Response) -> Vec<rsip::headers::Route> {
    let mut routes = response
        .headers
        .iter()
        .filter_map(|header| {
            if let Header::RecordRoute(rr) = header {
                Some(rsip::headers::Route::from(rr.value()))
            } else {
                None
            }
        })
        .collect::<Vec<_>>();
    routes.reverse();
    routes
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogState::Init => write!(f, "Init"),
            DialogState::ProceedingUac => write!(f, "ProceedingUac"),
            DialogState::ProceedingUas => write!(f, "ProceedingUas"),
            DialogState::AcceptedUac => write!(f, "AcceptedUac"),
            DialogState::AcceptedUas => write!(f, "AcceptedUas"),
            DialogState::Confirmed => write!(f, "Confirmed"),
            DialogState::Bye => write!(f, "Bye"),
            DialogState::Terminated => write!(f, "Terminated"),
        }
    }
}
