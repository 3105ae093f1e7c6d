//! Proxy routing engine.
//!
//! Takes an inbound request plus a target specification, decides
//! between stateful forking and stateless forwarding, and applies the
//! Via / Route / Max-Forwards mechanics shared by both paths. The
//! actual fork bookkeeping (branch transactions, best-response
//! selection) belongs to the forking layer; this engine hands it the
//! normalized target groups.

use rsip::prelude::UntypedHeader;
use rsip::{Header, Method};
use tracing::{debug, error, info, warn};

use crate::call::Call;
use crate::header_pop;
use crate::rsip_ext::{max_forwards_of, RsipHeadersExt};
use crate::transaction::Transaction;
use crate::{Error, Result};

pub mod uri_set;

pub use uri_set::{normalize, TargetSpec, UriSet};

/// Options steering one proxied request.
///
/// Unknown options cannot exist: this is the whole vocabulary.
#[derive(Debug, Clone, Default)]
pub struct ProxyOption {
    /// Forward without transaction state, to the first target only.
    pub stateless: bool,
    /// Insert Record-Route so in-dialog requests pass through here
    /// (INVITE only).
    pub record_route: bool,
    /// Let the forking layer chase 3xx answers.
    pub follow_redirects: bool,
    /// Headers prepended to the forwarded request.
    pub headers: Vec<Header>,
    /// Routes prepended to the retained Route set.
    pub route: Vec<rsip::headers::Route>,
    /// Drop the existing Route set.
    pub remove_routes: bool,
    /// Drop everything but the system headers.
    pub remove_headers: bool,
}

/// What the proxy decided to do with the request.
#[derive(Debug)]
pub enum ProxyAction {
    /// Fork across the normalized groups; handed to the forking layer.
    Stateful(UriSet),
    /// Forwarded without transaction state.
    Stateless,
    /// Answer locally with this response.
    Reply(rsip::Response),
}

impl Call {
    /// Route an inbound request to the given targets.
    pub async fn proxy(
        &mut self,
        trans: &mut Transaction,
        targets: &TargetSpec,
        opt: &ProxyOption,
    ) -> Result<ProxyAction> {
        let normalized = normalize(targets);
        let method = trans.original.method.clone();

        let first_target = normalized
            .iter()
            .find(|group| !group.is_empty())
            .and_then(|group| group.first())
            .cloned();
        let Some(first_target) = first_target else {
            if method == Method::Ack {
                info!("proxying ack with no targets");
            }
            return Err(Error::TemporarilyUnavailable);
        };

        // ACK is end to end: no transaction, straight out the door
        if method == Method::Ack {
            if let Some(reply) = self.check_forwards(&trans.original)? {
                return Ok(ProxyAction::Reply(reply));
            }
            self.preprocess(trans, opt);
            self.route_stateless(trans, first_target).await?;
            return Ok(ProxyAction::Stateless);
        }

        if opt.record_route && method == Method::Invite {
            trans.record_route = true;
        }
        if let Some(reply) = self.check_forwards(&trans.original)? {
            return Ok(ProxyAction::Reply(reply));
        }

        let required = proxy_require_tokens(&trans.original);
        if !required.is_empty() {
            return Err(Error::BadExtension(required.join(",")));
        }

        self.preprocess(trans, opt);
        if opt.stateless {
            self.route_stateless(trans, first_target).await?;
            Ok(ProxyAction::Stateless)
        } else {
            Ok(ProxyAction::Stateful(normalized))
        }
    }

    /// RFC 3261 §16.3/§16.6: a request must still have hops left.
    /// Returns the local reply when it does not.
    fn check_forwards(&self, request: &rsip::Request) -> Result<Option<rsip::Response>> {
        let Some(mf) = max_forwards_of(&request.headers) else {
            return Ok(None);
        };
        let forwards: i64 = mf
            .value()
            .trim()
            .parse()
            .map_err(|_| Error::InvalidRequest(format!("max-forwards: {:?}", mf.value())))?;
        if forwards < 0 {
            return Err(Error::InvalidRequest(format!("max-forwards: {}", forwards)));
        }
        if forwards > 0 {
            return Ok(None);
        }
        if request.method == Method::Options {
            // the request was aimed at us after all
            return Ok(Some(self.options_reply(request)));
        }
        Err(Error::TooManyHops)
    }

    fn options_reply(&self, request: &rsip::Request) -> rsip::Response {
        let mut headers = request.headers.clone();
        headers.retain(|h| {
            matches!(
                h,
                Header::Via(_)
                    | Header::CallId(_)
                    | Header::From(_)
                    | Header::To(_)
                    | Header::CSeq(_)
            )
        });
        headers.push(Header::Allow(
            "INVITE, ACK, CANCEL, OPTIONS, BYE, INFO, UPDATE".into(),
        ));
        headers.push(Header::Supported("path, replaces".into()));
        headers.push(Header::Accept("application/sdp".into()));
        headers.push(Header::UserAgent(self.opt.user_agent.clone().into()));
        rsip::Response {
            status_code: rsip::StatusCode::OK,
            version: request.version.clone(),
            headers,
            body: vec![],
        }
    }

    /// Header surgery applied before any forward, stateful or not.
    fn preprocess(&self, trans: &mut Transaction, opt: &ProxyOption) {
        let request = &mut trans.original;

        let forwards = max_forwards_of(&request.headers)
            .and_then(|mf| mf.value().trim().parse::<u32>().ok())
            .unwrap_or(self.opt.max_forwards);
        request.headers.unique_push(Header::MaxForwards(
            forwards.saturating_sub(1).to_string().into(),
        ));

        if opt.remove_routes {
            request.headers.retain(|h| !matches!(h, Header::Route(_)));
        }
        if opt.remove_headers {
            request.headers.retain(|h| {
                matches!(
                    h,
                    Header::Via(_)
                        | Header::From(_)
                        | Header::To(_)
                        | Header::CallId(_)
                        | Header::CSeq(_)
                        | Header::MaxForwards(_)
                        | Header::Route(_)
                        | Header::RecordRoute(_)
                        | Header::Contact(_)
                        | Header::ContentType(_)
                        | Header::ContentLength(_)
                )
            });
        }
        for route in opt.route.iter().rev() {
            request.headers.push_front(Header::Route(route.clone()));
        }
        for header in opt.headers.iter().rev() {
            request.headers.push_front(header.clone());
        }
    }

    /// Rewrite the Request-URI and send, no transaction left behind.
    async fn route_stateless(
        &self,
        trans: &mut Transaction,
        target: rsip::Uri,
    ) -> Result<()> {
        trans.original.uri = target;
        trans.stateless = true;

        if self.transport.is_local(&self.app_id, &trans.original.uri) {
            return Err(Error::LoopDetected);
        }

        let request = self.transport.add_via(trans.original.clone());
        match self.transport.send_request(request).await {
            Ok(_) => debug!("stateless forward to {}", trans.original.uri),
            Err(e) => warn!("stateless forward failed: {}", e),
        }
        Ok(())
    }

    /// Forward a response statelessly: shed our Via and pass it along.
    pub async fn response_stateless(&self, mut response: rsip::Response) -> Result<()> {
        header_pop!(response.headers, Header::Via);
        if response
            .headers
            .iter()
            .any(|h| matches!(h, Header::Via(_)))
        {
            match self.transport.send_response(response).await {
                Ok(_) => debug!("stateless response forwarded"),
                Err(e) => warn!("stateless response failed: {}", e),
            }
        } else if self.opt.drop_log_error {
            error!("stateless response has no via left, dropping");
        } else {
            info!("stateless response has no via left, dropping");
        }
        Ok(())
    }
}

fn proxy_require_tokens(request: &rsip::Request) -> Vec<String> {
    request
        .headers
        .iter()
        .filter_map(|h| match h {
            Header::ProxyRequire(pr) => Some(pr.value().trim().to_string()),
            _ => None,
        })
        .filter(|v| !v.is_empty())
        .collect()
}
