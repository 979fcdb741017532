//! End-to-end authorization-code lifecycle against in-process backends.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use grantvault_core::prelude::*;
use grantvault_core::token::jwt::{
    JwtAccessTokenSigner, JwtIdTokenIssuer, JwtService, SigningKeyPair,
};
use grantvault_memory::{
    InMemoryClientDirectory, InMemoryUserDirectory, LocalGrantCache, MemoryTokenRecordStorage,
};

use crate::cli::{DemoArgs, DemoStrategy};
use crate::observability::init_metrics;
use crate::output::{abbreviate, print_step, print_success};

const DEMO_USER: &str = "demo-user";

fn demo_client(args: &DemoArgs) -> Client {
    let mut client = Client::new(args.client_id.as_str(), "Demo client");
    client.access_token_as_jwt = args.jwt_access_tokens;
    client
}

fn build_service(config: &GrantConfig, args: &DemoArgs) -> Result<GrantService> {
    let mut config = config.clone();
    match args.strategy {
        Some(DemoStrategy::Memory) => {
            config.storage.strategy = StorageStrategy::InMemory;
            config.cache.enabled = false;
        }
        Some(DemoStrategy::Persistent) => {
            config.storage.strategy = StorageStrategy::Persistent;
            config.cache.enabled = false;
        }
        Some(DemoStrategy::Cached) => {
            config.storage.strategy = StorageStrategy::InMemory;
            config.cache.enabled = true;
        }
        None => {}
    }

    let signing_key = SigningKeyPair::generate_ec().context("Failed to generate signing key")?;
    let jwt = JwtService::new(signing_key, config.issuer.clone());
    let signer = JwtAccessTokenSigner::new(jwt.clone());
    let services = GrantServices::new(config)
        .with_id_token_issuer(Arc::new(JwtIdTokenIssuer::new(jwt)))
        .with_access_token_signer(Arc::new(signer));

    let users = Arc::new(InMemoryUserDirectory::new());
    users.insert(User::new(DEMO_USER, "demo"));
    let clients = Arc::new(InMemoryClientDirectory::new());
    clients.insert(demo_client(args));

    let service = GrantService::builder()
        .record_storage(Arc::new(MemoryTokenRecordStorage::new()))
        .cache(Arc::new(LocalGrantCache::new()))
        .users(users)
        .clients(clients)
        .build(services)?;
    Ok(service)
}

pub async fn run(config: &GrantConfig, args: &DemoArgs) -> Result<()> {
    let metrics = if args.metrics { init_metrics() } else { None };
    let service = build_service(config, args)?;
    print_step("Backend", service.factory().backend().name());

    let user = User::new(DEMO_USER, "demo");
    let client = demo_client(args);
    let grant = service
        .create_authorization_code_grant(user, client, None)
        .await?;
    let granted = grant.check_scopes_policy(&args.scope).await?;
    let code = grant
        .authorization_code()
        .context("grant has no authorization code")?
        .code()
        .to_string();
    print_step("Grant", grant.grant_id());
    print_step("Authorization code", &abbreviate(&code));
    print_step("Scopes", &granted);

    let grant = service
        .exchange_authorization_code(&args.client_id, &code)
        .await?;
    print_success("authorization code exchanged");

    let Some(access) = service.issue_access_token(&grant, None).await? else {
        bail!("access token could not be issued");
    };
    print_step("Access token", &abbreviate(access.code()));
    let Some(refresh) = service.issue_refresh_token(&grant).await? else {
        bail!("refresh token could not be issued");
    };
    print_step("Refresh token", &abbreviate(refresh.code()));
    match service
        .issue_id_token(&grant, None, Some(code.as_str()), Some(access.code()))
        .await?
    {
        Some(id_token) => print_step("ID token", &abbreviate(id_token.code())),
        None => print_step("ID token", "not issued"),
    }

    let Some(resolved) = service.grant_by_refresh_token(refresh.code()).await? else {
        bail!("refresh token did not resolve");
    };
    let Some(rotated) = service.issue_refresh_token(&resolved).await? else {
        bail!("refresh token could not be rotated");
    };
    print_step("Rotated refresh token", &abbreviate(rotated.code()));
    if service
        .grant_by_refresh_token(refresh.code())
        .await?
        .is_none()
    {
        print_success("previous refresh token no longer resolves");
    }

    if args.replay {
        match service.exchange_authorization_code(&args.client_id, &code).await {
            Ok(_) => println!("{} replayed code was accepted", "!".yellow()),
            Err(err) => {
                print_step("Replay", &err.to_string());
                let revoked = service
                    .grant_by_access_token(access.code())
                    .await?
                    .is_none();
                print_step(
                    "Access token after replay",
                    if revoked { "revoked" } else { "still active" },
                );
            }
        }
    }

    let swept = service.cleanup_expired().await?;
    print_step("Expired entries swept", &swept.to_string());

    if let Some(handle) = metrics {
        println!();
        print!("{}", handle.render());
    }
    Ok(())
}
