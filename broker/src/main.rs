//! Startup glue: flag/env parsing, reading the bearer token and TLS key pair
//! off disk, the ambient namespace evar, and the declarative configuration
//! file — none of which is importable from `broker_core`.

#[macro_use]
extern crate log;

use std::env;
use std::fs;

use broker_core::resource_store::kube_store::KubeResourceStore;
use broker_core::{Config, ConfigStore, Provisioner};
use broker::{Certificate, ServerConfig};

fn read_env(name: &str) -> std::io::Result<String> {
    env::var(name).map_err(|_| std::io::Error::new(std::io::ErrorKind::NotFound, format!("{} is not set", name)))
}

fn read_file(path: &str) -> std::io::Result<Vec<u8>> {
    fs::read(path).map_err(|e| std::io::Error::new(e.kind(), format!("failed to read '{}': {}", path, e)))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env::set_var("RUST_LOG", "actix_web=info,broker=info,kube=info");
    if let Ok(level) = env::var("LOG_LEVEL") {
        if level.to_lowercase() == "debug" {
            env::set_var("RUST_LOG", "actix_web=debug,broker=debug,kube=debug");
        }
    }
    env_logger::init();

    let namespace = read_env("NAMESPACE")?;
    let token_file = read_env("BROKER_TOKEN_FILE")?;
    let cert_file = read_env("BROKER_TLS_CERT_FILE")?;
    let key_file = read_env("BROKER_TLS_KEY_FILE")?;
    let config_file = read_env("BROKER_CONFIG_FILE")?;

    let token = String::from_utf8(read_file(&token_file)?)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("BROKER_TOKEN_FILE is not valid UTF-8: {}", e)))?
        .trim()
        .to_string();
    let cert_pem = read_file(&cert_file)?;
    let key_pem = read_file(&key_file)?;

    info!("loading broker configuration from {}", config_file);
    let config_bytes = read_file(&config_file)?;
    let config: Config = serde_yaml::from_slice(&config_bytes)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("invalid broker configuration: {}", e)))?;
    let config_store =
        ConfigStore::load(config).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("broker configuration did not validate: {}", e)))?;

    info!("connecting to the orchestration substrate");
    let client = kube::Client::try_default().await.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("failed to build kube client: {}", e)))?;
    let store = KubeResourceStore::new(client, namespace.clone());
    let provisioner = Provisioner::new(store);

    let server_config = ServerConfig { namespace, token, certificate: Certificate { cert_pem, key_pem } };
    broker::run(server_config, config_store, provisioner).await
}
