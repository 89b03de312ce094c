//! # DadHub Binary
//!
//! Assembles the stores over the in-process adapters chosen by configuration,
//! then walks one member through onboarding, posting and a daily check-in.
//!
//! ```text
//! dadhub [--config <file>] [--ref <link>] [--image <path>]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use auth_adapters::{AuthSettings, InMemoryIdentityProvider};
use bytes::Bytes;
use clap::Parser;
use configs::{AppConfig, LogFormat, DEFAULT_CONFIG_FILE};
use domains::ports::{KeyValueStore, ObjectStorage, SystemClock};
use secrecy::SecretString;
use services::discussions::{ImageUpload, NewPost};
use services::gamification::CheckIn;
use services::{Backend, DadHub, ProfileSetup, Rules};
use storage_adapters::{
    FileKeyValueStore, InMemoryDocumentStore, InMemoryKeyValueStore, InMemoryObjectStorage, LocalMediaStore,
};
use tracing_subscriber::EnvFilter;

const DEMO_EMAIL: &str = "demo@dadhub.local";
const DEMO_PASSWORD: &str = "demo-dad-2024";

#[derive(Debug, Parser)]
#[command(name = "dadhub")]
#[command(about = "Runs a DadHub member session against in-process adapters")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Invite link to capture before sign-up, e.g. `https://dadhub.app/?ref=DAD4K2Q9Z`
    #[arg(long = "ref", value_name = "LINK")]
    referral_link: Option<String>,

    /// Image to attach to the first post
    #[arg(long, value_name = "PATH")]
    image: Option<PathBuf>,
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

fn rules_from(config: &AppConfig) -> Rules {
    Rules {
        admin_emails: config.admin.emails.clone(),
        admin_seed_points: config.admin.seed_points,
        admin_seed_level: config.admin.seed_level,
        xp_per_level: config.gamification.xp_per_level,
        check_in_points: config.gamification.check_in_points,
        spin_prizes: config.gamification.spin_prizes.clone(),
        referrer_bonus: config.referrals.referrer_bonus,
        referee_bonus: config.referrals.referee_bonus,
        page_size: config.feeds.page_size,
    }
}

fn backend_from(config: &AppConfig) -> anyhow::Result<Backend> {
    let identity = InMemoryIdentityProvider::new(AuthSettings {
        max_failed_attempts: config.auth.max_failed_attempts,
        lockout: chrono::Duration::minutes(config.auth.lockout_minutes),
        memory_kib: config.auth.argon2_memory_kib,
        iterations: config.auth.argon2_iterations,
    })?;

    let objects: Arc<dyn ObjectStorage> = match &config.media.root {
        Some(root) => Arc::new(LocalMediaStore::new(
            root.clone(),
            config.media.url_prefix.clone(),
            config.media.max_bytes,
        )),
        None => Arc::new(InMemoryObjectStorage::new(config.media.max_bytes)),
    };

    let local: Arc<dyn KeyValueStore> = match &config.local_storage.path {
        Some(path) => Arc::new(
            FileKeyValueStore::open(path.clone()).with_context(|| format!("opening {}", path.display()))?,
        ),
        None => Arc::new(InMemoryKeyValueStore::new()),
    };

    Ok(Backend {
        documents: Arc::new(InMemoryDocumentStore::new()),
        identity: Arc::new(identity),
        objects,
        local,
        clock: Arc::new(SystemClock),
    })
}

/// Registers the first reserved admin email and returns its referral code.
async fn bootstrap_admin(hub: &DadHub, email: &str, password: SecretString) -> anyhow::Result<String> {
    hub.session
        .sign_up(email, password)
        .await
        .context("registering bootstrap admin")?;
    let admin = hub
        .finish_onboarding(ProfileSetup {
            display_name: "DadHub Admin".to_string(),
            avatar: "🛡️".to_string(),
            bio: None,
        })
        .await?;
    let code = hub.referrals.my_code().await?;
    tracing::info!(uid = %admin.id, level = admin.stats.level, code = %code, "bootstrap admin ready");
    hub.sign_out().await;
    Ok(code)
}

async fn read_image(path: &Path) -> anyhow::Result<ImageUpload> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(ImageUpload {
        data: Bytes::from(data),
        content_type: mime_guess::from_path(path).first_or_octet_stream(),
    })
}

async fn run_demo(hub: &DadHub, args: &Args) -> anyhow::Result<()> {
    if let Some(link) = &args.referral_link {
        if let Some(code) = hub.referrals.capture_from_url(link)? {
            tracing::info!(code = %code, "captured invite before sign-up");
        }
    }

    hub.session
        .sign_up(DEMO_EMAIL, SecretString::from(DEMO_PASSWORD.to_string()))
        .await
        .context("registering demo member")?;
    let member = hub
        .finish_onboarding(ProfileSetup {
            display_name: "Demo Dad".to_string(),
            avatar: "🧔".to_string(),
            bio: Some("Here for the grill tips.".to_string()),
        })
        .await?;
    tracing::info!(uid = %member.id, points = member.stats.points, referred_by = ?member.referred_by, "member onboarded");

    hub.discussions.watch_feed(None).await?;
    let image = match &args.image {
        Some(path) => Some(read_image(path).await?),
        None => None,
    };
    let post_id = hub
        .discussions
        .create_post(NewPost {
            title: "Hello from the grill".to_string(),
            content: "First post. Any tips for brisket?".to_string(),
            category: Some("cooking".to_string()),
            image,
        })
        .await?;
    hub.discussions.toggle_like(&post_id).await?;
    hub.discussions.toggle_reaction(&post_id, "🔥").await?;
    hub.discussions.add_comment(&post_id, "Low and slow.").await?;

    match hub.gamification.check_in().await? {
        CheckIn::Recorded { streak, points } => tracing::info!(streak, points, "checked in"),
        CheckIn::AlreadyCheckedIn => tracing::info!("already checked in today"),
    }
    if let Some(prize) = hub.gamification.spin().await? {
        tracing::info!(prize, "daily spin");
    }

    for post in hub.discussions.posts() {
        tracing::info!(
            id = %post.id,
            title = %post.title,
            likes = post.like_count(),
            comments = post.comment_count,
            image = ?post.image_url,
            "feed"
        );
    }
    for (rank, entry) in hub.gamification.leaderboard(10).await?.iter().enumerate() {
        tracing::info!(rank = rank + 1, name = %entry.display_name, points = entry.stats.points, "leaderboard");
    }

    hub.sign_out().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = Args::parse();

    // 1. Load configuration (.env, config file, DADHUB__* variables)
    let mut config = AppConfig::load_with(&args.config)?;

    // 2. Initialize structured logging
    init_tracing(&config);

    // 3. Wire the adapters behind the ports
    let backend = backend_from(&config)?;
    let hub = DadHub::new(backend, rules_from(&config));

    // 4. Seed the reserved admin when a bootstrap password is configured
    let admin_email = config.admin.emails.first().cloned();
    if let (Some(email), Some(password)) = (admin_email, config.admin.bootstrap_password.take()) {
        let code = bootstrap_admin(&hub, &email, password).await?;
        if args.referral_link.is_none() {
            args.referral_link = Some(format!("/?ref={code}"));
        }
    }

    tracing::info!(media = ?config.media.root, local_storage = ?config.local_storage.path, "DadHub starting");

    // 5. One member session against the shared backend
    run_demo(&hub, &args).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_default_to_the_standard_config_file() {
        let args = Args::try_parse_from(["dadhub"]).unwrap();
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert!(args.referral_link.is_none());
        assert!(args.image.is_none());
    }

    #[test]
    fn ref_and_image_flags_are_parsed() {
        let args = Args::try_parse_from(["dadhub", "--ref", "/?ref=DAD123ABC", "--image", "grill.png"]).unwrap();
        assert_eq!(args.referral_link.as_deref(), Some("/?ref=DAD123ABC"));
        assert_eq!(args.image, Some(PathBuf::from("grill.png")));
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(Args::try_parse_from(["dadhub", "--verbose-please"]).is_err());
    }
}
