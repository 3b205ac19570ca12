//! StelloVault Sign-in CLI
//!
//! Signs the configured wallet in to the StelloVault API and keeps the session
//! in a local file. With `AUTH_USE_STUB_BACKEND=true` the whole flow runs
//! against the in-process stub backend and signer.
//!
//! Usage: `stellovault-signin [sign-in | sign-out | status]`

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use stellovault_signin::auth::{
    AuthController, ChallengeClient, HttpChallengeClient, SharedWallet, SignatureRejection,
    SigningProvider, StubChallengeClient, StubSigner, WalletState,
};
use stellovault_signin::config::Config;
use stellovault_signin::storage::FileStore;

/// Prints the challenge and reads the signature from stdin. An empty line
/// declines.
struct PromptSigner;

#[async_trait]
impl SigningProvider for PromptSigner {
    async fn sign(&self, text: &str) -> Result<String, SignatureRejection> {
        println!("Sign this message with your wallet:\n\n{}\n", text);
        print!("Signature (leave empty to cancel): ");
        std::io::stdout()
            .flush()
            .map_err(|e| SignatureRejection::Provider(e.to_string()))?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| SignatureRejection::Provider(e.to_string()))?;

        match line.trim() {
            "" => Err(SignatureRejection::DeclinedByUser),
            signature => Ok(signature.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .init();

    let command = std::env::args().nth(1).unwrap_or_else(|| "status".to_string());
    let address = config.require_wallet_address()?.to_string();

    tracing::info!(
        domain = %config.auth.domain,
        session_file = %config.session_file.display(),
        stub = config.use_stub_backend,
        "Starting StelloVault sign-in"
    );

    let (client, signer): (Arc<dyn ChallengeClient>, Arc<dyn SigningProvider>) =
        if config.use_stub_backend {
            (
                Arc::new(StubChallengeClient::new(
                    config.auth.domain.clone(),
                    config.auth.chain_id,
                )),
                Arc::new(StubSigner::new(address.clone())),
            )
        } else {
            (
                Arc::new(HttpChallengeClient::new(&config.auth)?),
                Arc::new(PromptSigner),
            )
        };

    let wallet = Arc::new(SharedWallet::new(WalletState::connected(address)));
    let store = Arc::new(FileStore::new(config.session_file.clone()));
    let controller = AuthController::new(config.auth.clone(), wallet, signer, client, store);

    // A session left behind by another wallet is not ours
    controller.reload()?;

    match command.as_str() {
        "sign-in" => {
            controller.sign_in().await?;
            match controller.session()? {
                Some(session) => println!("Signed in as {}", session.bound_address),
                None => println!("Signed in."),
            }
        }
        "sign-out" => {
            controller.sign_out()?;
            println!("Signed out.");
        }
        "status" => match controller.session()? {
            Some(session) if controller.is_authenticated() => {
                println!("Signed in as {}", session.bound_address);
            }
            _ => println!("Not signed in."),
        },
        other => bail!("Unknown command '{}'. Expected sign-in, sign-out or status", other),
    }

    Ok(())
}
