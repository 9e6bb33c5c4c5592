//! Message relay: outbound dispatch and inbound reply reconciliation.
//!
//! Three entry points, each safe to re-run:
//! - [`dispatch_outbound`] delivers pending outbound messages by email and SMS
//! - [`reconcile_inbound_email`] turns fetched replies into inbox messages
//! - [`reconcile_inbound_sms`] does the same for provider-held SMS

pub mod dispatcher;
pub mod email_body;
pub mod email_reconciler;
pub mod reply_parser;
pub mod scrub;
pub mod sms_reconciler;

use std::sync::Arc;

use crate::channels::{MailTransport, SmsProvider};
use crate::error::{Error, ReconcileError};
use crate::store::Database;

pub use dispatcher::{DispatchReport, dispatch_outbound};
pub use email_reconciler::{EmailReport, reconcile_inbound_email};
pub use scrub::{QuoteMarkerScrub, ScrubChain, ScrubRule};
pub use sms_reconciler::{SmsReport, reconcile_inbound_sms};

/// Addresses and identities the relay acts under.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// User credited as creator of synthesized messages.
    pub admin_username: String,
    /// Sender of outbound mail.
    pub from_address: String,
    /// The relay's SMS number, both sender and inbound listing key.
    pub sms_number: String,
    /// Address replies are mailed to; confirms provider quote markers.
    pub inbound_address: String,
}

/// Everything a relay run needs.
pub struct RelayContext {
    pub db: Arc<dyn Database>,
    pub mailer: Arc<dyn MailTransport>,
    pub sms: Arc<dyn SmsProvider>,
    pub scrubs: ScrubChain,
    pub settings: RelaySettings,
}

impl RelayContext {
    /// Context with the default provider scrub chain.
    pub fn new(
        db: Arc<dyn Database>,
        mailer: Arc<dyn MailTransport>,
        sms: Arc<dyn SmsProvider>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            db,
            mailer,
            sms,
            scrubs: ScrubChain::default(),
            settings,
        }
    }

    /// Id of the system actor. Missing actor fails the whole run.
    pub(crate) async fn system_actor(&self) -> Result<i64, Error> {
        let username = &self.settings.admin_username;
        self.db
            .find_user_id(username)
            .await?
            .ok_or_else(|| {
                ReconcileError::MissingSystemActor {
                    username: username.clone(),
                }
                .into()
            })
    }
}
