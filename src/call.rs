use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dialog::dialog::{Dialog, TerminatedReason};
use crate::dialog::store::DialogStore;
use crate::dialog::DialogId;
use crate::transaction::Transaction;
use crate::transport::Transport;

/// Tunables shared by every dialog and proxy operation of a Call.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub user_agent: String,
    /// Max-Forwards value assumed when a request carries none.
    pub max_forwards: u32,
    /// Log dropped stateless responses (no Via left) at error instead
    /// of info.
    pub drop_log_error: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            user_agent: concat!("sipcall/", env!("CARGO_PKG_VERSION")).to_string(),
            max_forwards: 70,
            drop_log_error: false,
        }
    }
}

/// Events driving a Call's state machine, processed strictly in
/// arrival order.
#[derive(Debug)]
pub enum CallEvent {
    /// A locally originated request is about to be sent.
    OutgoingRequest(Transaction),
    /// A locally originated ACK is about to be sent.
    OutgoingAck(rsip::Request),
    /// A response arrived on a client transaction.
    IncomingResponse(Transaction),
    /// The transaction layer gave up on the dialog's transaction.
    TransactionTimeout(DialogId),
}

/// Owner of everything belonging to one Call-ID: the dialog store and
/// the event loop that serializes all mutations to it.
///
/// One Call is one logical task; inter-call parallelism comes from
/// running many of them.
pub struct Call {
    pub app_id: String,
    pub call_id: String,
    pub(crate) dialogs: DialogStore,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) opt: CallOptions,
}

impl Call {
    pub fn new(
        app_id: impl Into<String>,
        call_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        opt: CallOptions,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            call_id: call_id.into(),
            dialogs: DialogStore::default(),
            transport,
            opt,
        }
    }

    pub fn dialog(&self, id: &DialogId) -> Option<&Dialog> {
        self.dialogs.find(id)
    }

    pub fn dialog_count(&self) -> usize {
        self.dialogs.len()
    }

    /// Process one event. Errors are reported back to direct callers
    /// of the handlers; from the event loop they are only logged, a
    /// bad event must not take the Call down.
    pub async fn process(&mut self, event: CallEvent) {
        match event {
            CallEvent::OutgoingRequest(trans) => {
                if let Err(e) = self.on_uac_request(&trans.original) {
                    info!("outgoing request rejected: {}", e);
                }
            }
            CallEvent::OutgoingAck(ack) => self.on_uac_ack(&ack),
            CallEvent::IncomingResponse(trans) => {
                if let Err(e) = self.on_uac_response(&trans).await {
                    info!("response processing failed: {}", e);
                }
            }
            CallEvent::TransactionTimeout(id) => self.on_transaction_timeout(&id),
        }
    }

    /// Transaction-layer timeout: the 408 path of the state machine.
    fn on_transaction_timeout(&mut self, id: &DialogId) {
        match self.dialogs.remove(id) {
            Some(mut dialog) => {
                dialog.terminate(TerminatedReason::Code(408));
                info!("dialog {} timed out", id);
            }
            None => debug!("timeout for unknown dialog {}", id),
        }
    }

    /// Consume events until the channel closes or the token fires.
    pub async fn run(
        mut self,
        mut events: UnboundedReceiver<CallEvent>,
        cancel: CancellationToken,
    ) -> Self {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("call {} cancelled", self.call_id);
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.process(event).await,
                    None => break,
                },
            }
        }
        self
    }
}
