use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use client_core::{
    controller::{
        ProfileController, ProfileField, SignInController, SignInField, SignUpController,
        SignUpField,
    },
    load_settings,
    upload::ResumableSession,
    AccountApi, HttpAccountApi, HttpObjectStore, ObjectStore, Route, RouteDecision, RouteGuard,
    SessionStore, Settings, UploadCoordinator, UploadError, UploadPolicy,
};
use futures::StreamExt;
use shared::{domain::UserRecord, error::ErrorInfo};
use tracing::{info, warn};
use url::Url;

#[derive(Parser, Debug)]
struct Cli {
    /// Account used by commands that need a signed-in session.
    #[arg(long, global = true)]
    email: Option<String>,
    #[arg(long, global = true)]
    password: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    SignUp {
        #[arg(long)]
        username: String,
    },
    SignIn,
    Update {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        new_email: Option<String>,
        #[arg(long)]
        new_password: Option<String>,
        /// Image uploaded to storage and set as the profile picture.
        #[arg(long)]
        avatar: Option<PathBuf>,
    },
    Delete,
    SignOut,
}

fn to_anyhow(error: ErrorInfo) -> anyhow::Error {
    anyhow!(error.message)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();

    let settings = load_settings();
    let base_url = settings.api_base_url()?;
    let api: Arc<dyn AccountApi> = Arc::new(HttpAccountApi::new(base_url.as_str())?);
    let store = SessionStore::new();

    let mut changes = store.subscribe();
    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let snapshot = changes.borrow_and_update().clone();
            info!(
                signed_in = snapshot.current_user.is_some(),
                loading = snapshot.loading(),
                "session changed"
            );
        }
    });

    match cli.command {
        Command::SignUp { username } => {
            let (email, password) = credentials(&cli.email, &cli.password)?;
            let mut controller = SignUpController::new(Arc::clone(&api));
            controller.set_field(SignUpField::Username, username);
            controller.set_field(SignUpField::Email, email);
            controller.set_field(SignUpField::Password, password);
            controller.submit().await.map_err(to_anyhow)?;
            println!("account created; continue at {}", Route::SignIn.path());
        }
        Command::SignIn => {
            let user = sign_in(&api, &store, &cli.email, &cli.password).await?;
            println!("signed in as {} <{}>", user.username, user.email);
        }
        Command::Update {
            username,
            new_email,
            new_password,
            avatar,
        } => {
            sign_in(&api, &store, &cli.email, &cli.password).await?;
            let mut profile = profile_controller(&api, &store, &settings, avatar.is_some())?;
            let decision = RouteGuard.check(Route::Profile, &store.snapshot());
            if let RouteDecision::Redirect(route) = decision {
                bail!("not signed in; go to {}", route.path());
            }

            if let Some(path) = avatar {
                upload_avatar(&mut profile, path).await?;
            }
            if let Some(username) = username {
                profile.set_field(ProfileField::Username, username);
            }
            if let Some(email) = new_email {
                profile.set_field(ProfileField::Email, email);
            }
            if let Some(password) = new_password {
                profile.set_field(ProfileField::Password, password);
            }
            if profile.pending_changes().is_empty() {
                bail!("nothing to update");
            }

            let user = profile.submit_update().await.map_err(to_anyhow)?;
            println!("profile updated: {} <{}>", user.username, user.email);
            if !user.avatar_url.is_empty() {
                println!("avatar: {}", user.avatar_url);
            }
        }
        Command::Delete => {
            sign_in(&api, &store, &cli.email, &cli.password).await?;
            let mut profile = profile_controller(&api, &store, &settings, false)?;
            profile.delete_account().await.map_err(to_anyhow)?;
            println!("account deleted");
        }
        Command::SignOut => {
            if cli.email.is_some() {
                sign_in(&api, &store, &cli.email, &cli.password).await?;
            }
            let mut profile = profile_controller(&api, &store, &settings, false)?;
            profile.sign_out().await;
            println!("signed out");
        }
    }

    Ok(())
}

fn credentials(email: &Option<String>, password: &Option<String>) -> Result<(String, String)> {
    match (email, password) {
        (Some(email), Some(password)) => Ok((email.clone(), password.clone())),
        _ => bail!("--email and --password are required for this command"),
    }
}

async fn sign_in(
    api: &Arc<dyn AccountApi>,
    store: &SessionStore,
    email: &Option<String>,
    password: &Option<String>,
) -> Result<UserRecord> {
    let (email, password) = credentials(email, password)?;
    let mut controller = SignInController::new(Arc::clone(api), store.clone());
    controller.set_field(SignInField::Email, email);
    controller.set_field(SignInField::Password, password);
    controller.submit().await.map_err(to_anyhow)
}

/// Storage settings are only required when an avatar is uploaded.
fn profile_controller(
    api: &Arc<dyn AccountApi>,
    store: &SessionStore,
    settings: &Settings,
    needs_storage: bool,
) -> Result<ProfileController> {
    let policy = UploadPolicy::from_settings(settings);
    let object_store: Arc<dyn ObjectStore> = match HttpObjectStore::from_settings(settings) {
        Ok(object_store) => Arc::new(object_store),
        Err(error) if needs_storage => return Err(error.into()),
        Err(error) => {
            warn!(%error, "object storage unavailable; avatar uploads are disabled");
            Arc::new(UnconfiguredStore)
        }
    };
    let uploads = UploadCoordinator::new(object_store, policy);
    Ok(ProfileController::new(Arc::clone(api), store.clone(), uploads))
}

async fn upload_avatar(profile: &mut ProfileController, path: PathBuf) -> Result<()> {
    let payload = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("avatar")
        .to_string();
    let content_type = mime_guess::from_path(&path)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string();

    let mut task = match profile
        .begin_avatar_upload(payload, filename, content_type)
        .await
    {
        Ok(task) => task,
        Err(_) => bail!(status_text(profile)),
    };
    let upload_id = task.id();
    info!(key = task.key(), "uploading avatar");
    while let Some(event) = task.next().await {
        let outcome = profile.apply_upload_event(upload_id, event);
        println!("{}", status_text(profile));
        match outcome {
            Some(Ok(_)) => return Ok(()),
            Some(Err(_)) => bail!(status_text(profile)),
            None => {}
        }
    }
    bail!("avatar upload ended without a result")
}

fn status_text(profile: &ProfileController) -> String {
    profile
        .upload_status_text()
        .unwrap_or_else(|| "Uploading: 0 %".to_string())
}

struct UnconfiguredStore;

fn unconfigured() -> UploadError {
    UploadError::Rejected("object storage is not configured".to_string())
}

#[async_trait]
impl ObjectStore for UnconfiguredStore {
    async fn open_session(
        &self,
        _key: &str,
        _total_bytes: u64,
        _content_type: &str,
    ) -> Result<ResumableSession, UploadError> {
        Err(unconfigured())
    }

    async fn send_chunk(
        &self,
        _session: &ResumableSession,
        _offset: u64,
        _chunk: &[u8],
        _finalize: bool,
    ) -> Result<u64, UploadError> {
        Err(unconfigured())
    }

    async fn download_url(&self, _session: &ResumableSession) -> Result<Url, UploadError> {
        Err(unconfigured())
    }
}
