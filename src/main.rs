use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use neighborow_relay::channels::{
    DisabledTransport, MailTransport, SmsProvider, SmtpMailer, TwilioClient,
};
use neighborow_relay::config::RelayConfig;
use neighborow_relay::relay::{RelayContext, RelaySettings};
use neighborow_relay::store::{Database, LibSqlBackend};
use neighborow_relay::worker::{Scheduler, provision};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = RelayConfig::from_env().context("Invalid configuration")?;

    // Initialize tracing; the guard flushes the file writer on exit
    let (file_writer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "neighborow-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
        }))
        .init();

    eprintln!("📬 Neighborow relay v{}", env!("CARGO_PKG_VERSION"));

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Transports ───────────────────────────────────────────────────────
    let mailer: Arc<dyn MailTransport> = match &config.smtp {
        Some(smtp) => {
            eprintln!("   Email: enabled (SMTP: {}:{})", smtp.host, smtp.port);
            Arc::new(SmtpMailer::new(smtp.clone()))
        }
        None => {
            eprintln!("   Email: disabled (EMAIL_SMTP_HOST not set)");
            Arc::new(DisabledTransport::new("email"))
        }
    };

    let (sms, sms_number): (Arc<dyn SmsProvider>, String) = match &config.twilio {
        Some(twilio) => {
            eprintln!("   SMS: enabled (number: {})", twilio.phone_number);
            (
                Arc::new(TwilioClient::new(twilio.clone())),
                twilio.phone_number.clone(),
            )
        }
        None => {
            eprintln!("   SMS: disabled (TWILIO_ACCOUNT_SID not set)");
            (Arc::new(DisabledTransport::new("sms")), String::new())
        }
    };

    // ── Provisioning ─────────────────────────────────────────────────────
    provision(db.as_ref(), &config)
        .await
        .context("Startup provisioning failed")?;

    let ctx = Arc::new(RelayContext::new(
        Arc::clone(&db),
        mailer,
        sms,
        RelaySettings {
            admin_username: config.admin_username.clone(),
            from_address: config.from_address.clone(),
            sms_number,
            inbound_address: config.inbound_address.clone(),
        },
    ));

    // ── Scheduler ────────────────────────────────────────────────────────
    let scheduler = Scheduler::new(ctx);
    let handles = scheduler.start().await.context("Failed to start scheduler")?;
    eprintln!(
        "   Schedules: dispatch every {}m, fetch every {}m\n",
        config.dispatch_interval_minutes, config.fetch_interval_minutes
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutdown requested");
    scheduler.shutdown_flag().store(true, Ordering::Relaxed);
    for handle in handles {
        handle.abort();
    }

    Ok(())
}
