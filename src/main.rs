use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zeroize::Zeroizing;

use carebloom::auth::{AuthGateway, LoginOutcome};
use carebloom::backend::memory::MemoryBackend;
use carebloom::backend::{ChangeFeed, IdentityProvider, RowStore};
use carebloom::config::{self, Config};
use carebloom::models::account::{DonorSignup, OrganizationSignup};
use carebloom::models::notification::NotificationType;
use carebloom::navigation::NavigationLog;
use carebloom::notification::{Dispatch, InitOutcome, NotificationChannel, ToastBoard, ToastId, Toaster};
use carebloom::supabase::Supabase;

mod cli;

/// Backend adapters shared by the services.
struct Services {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn RowStore>,
    feed: Arc<dyn ChangeFeed>,
}

impl Services {
    fn connect(cfg: &Config, offline: bool) -> anyhow::Result<Self> {
        if offline {
            tracing::info!("using in-process memory backend");
            let memory = Arc::new(MemoryBackend::new());
            return Ok(Self {
                identity: memory.clone(),
                store: memory.clone(),
                feed: memory,
            });
        }

        tracing::info!(url = %cfg.supabase_url, "connecting to supabase project");
        let supabase = Supabase::connect(cfg).context("failed to set up supabase client")?;
        Ok(Self {
            identity: supabase.auth,
            store: supabase.rest,
            feed: supabase.realtime,
        })
    }
}

/// Prints each toast as it appears; timing is left to the board.
struct ConsoleToaster {
    board: ToastBoard,
}

impl Toaster for ConsoleToaster {
    fn show(&self, title: &str, message: &str, kind: NotificationType) -> ToastId {
        println!("[{}] {}: {}", kind, title, message);
        self.board.show(title, message, kind)
    }

    fn dismiss(&self, id: ToastId) -> bool {
        self.board.dismiss(id)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "carebloom=debug".into()));
    let json_logs = std::env::var("CAREBLOOM_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let args = cli::Cli::parse();
    let cfg = if args.offline {
        config::load().unwrap_or_default()
    } else {
        config::load()?
    };

    let services = Services::connect(&cfg, args.offline)?;
    let navigator = Arc::new(NavigationLog::new());
    let gateway = AuthGateway::new(
        services.identity.clone(),
        services.store.clone(),
        navigator.clone(),
        &cfg,
    );

    let result = run(args.command, &cfg, &services, &gateway).await;

    for hop in navigator.hops() {
        println!("-> {}", hop);
    }
    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run(
    command: cli::Commands,
    cfg: &Config,
    services: &Services,
    gateway: &AuthGateway,
) -> anyhow::Result<()> {
    match command {
        cli::Commands::CheckEmail { email } => {
            let taken = gateway.check_email_exists(&email).await;
            println!("{}: {}", email, if taken { "registered" } else { "available" });
        }
        cli::Commands::CheckPhone { phone, scope } => {
            let taken = gateway.check_phone_exists(&phone, scope.into()).await;
            println!("{}: {}", phone, if taken { "registered" } else { "available" });
        }
        cli::Commands::Login { email, password } => {
            sign_in(gateway, &email, &password).await?;
            if let Some(user) = gateway.get_current_user().await? {
                if let Some(account) = gateway.resolve_account(user.id).await? {
                    println!(
                        "signed in as {} <{}> ({:?})",
                        account.display_name(),
                        account.email(),
                        account.role()
                    );
                }
            }
        }
        cli::Commands::SignupDonor {
            email,
            password,
            phone,
            first_name,
            last_name,
            age,
            city,
            state,
            pin_code,
            address,
        } => {
            let form = DonorSignup {
                email,
                password: Zeroizing::new(password),
                phone_number: phone,
                first_name,
                last_name,
                age,
                city,
                state,
                pin_code,
                address,
            };
            let outcome = gateway.signup_donor(&form).await?;
            println!("donor {} registered (signed in: {})", outcome.user_id, outcome.signed_in);
        }
        cli::Commands::SignupNgo {
            email,
            password,
            name,
            phone,
            org_type,
            registration_number,
            registration_date,
            address,
            city,
            state,
            pin_code,
            website,
        } => {
            let form = OrganizationSignup {
                email,
                password: Zeroizing::new(password),
                contact_number: phone,
                ngo_name: name,
                org_type,
                registration_number,
                registration_date,
                address,
                city,
                state,
                pin_code,
                website,
            };
            let outcome = gateway.signup_ngo(&form).await?;
            println!("NGO {} registered (signed in: {})", outcome.user_id, outcome.signed_in);
        }
        cli::Commands::Watch { email, password } => {
            sign_in(gateway, &email, &password).await?;
            let channel = notification_channel(cfg, services);

            match channel.initialize().await? {
                InitOutcome::Ready { backlog, welcome, .. } => {
                    println!("{} unread notification(s)", backlog.len());
                    report(welcome)?;
                }
                InitOutcome::NoSession => anyhow::bail!("no session after login"),
                InitOutcome::AlreadyInitialized => {}
            }

            println!("watching for notifications, Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            channel.shutdown().await;
            gateway.logout().await?;
        }
        cli::Commands::Notify {
            email,
            password,
            command,
        } => {
            sign_in(gateway, &email, &password).await?;
            let channel = notification_channel(cfg, services);

            let dispatch = match command {
                cli::NotifyCommands::DonationRequest { donation_id, ngo_name } => {
                    channel
                        .trigger_donation_request_notification(&donation_id, &ngo_name)
                        .await
                }
                cli::NotifyCommands::RequestStatus {
                    request_id,
                    status,
                    donor_name,
                } => {
                    channel
                        .trigger_request_status_notification(&request_id, &status, &donor_name)
                        .await
                }
                cli::NotifyCommands::Delivery {
                    tracking_id,
                    status,
                    ngo_name,
                } => {
                    channel
                        .trigger_delivery_notification(&tracking_id, &status, &ngo_name)
                        .await
                }
                cli::NotifyCommands::Test => {
                    channel.initialize().await?;
                    channel.send_test_notification().await
                }
                cli::NotifyCommands::MarkRead { id } => {
                    channel.mark_as_read(id).await?;
                    println!("notification {} marked as read", id);
                    return Ok(());
                }
            };
            report(dispatch)?;
            channel.shutdown().await;
        }
    }

    Ok(())
}

async fn sign_in(gateway: &AuthGateway, email: &str, password: &str) -> anyhow::Result<()> {
    match gateway.login(email, password).await? {
        LoginOutcome::Routed(destination) => {
            tracing::debug!(destination = %destination, "login routed");
            Ok(())
        }
        LoginOutcome::Skipped => anyhow::bail!("another login is already in progress"),
    }
}

fn notification_channel(cfg: &Config, services: &Services) -> NotificationChannel {
    NotificationChannel::new(
        services.identity.clone(),
        services.store.clone(),
        services.feed.clone(),
        Arc::new(ConsoleToaster {
            board: ToastBoard::from_config(cfg),
        }),
        cfg,
    )
}

fn report(dispatch: Dispatch) -> anyhow::Result<()> {
    match dispatch {
        Dispatch::Delivered(n) => println!("notification {} delivered", n.id),
        Dispatch::Stored(n) => println!("notification {} stored for {}", n.id, n.user_id),
        Dispatch::Skipped => println!("nothing to send"),
        Dispatch::Failed(e) => return Err(e).context("notification failed"),
    }
    Ok(())
}
