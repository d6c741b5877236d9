//! End-to-end signing decisions over in-memory accounts.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::{
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use autosign::{
    Autosigner, Config,
    testutil::{CsrBuilder, csr_with, preshared_key_extension},
};
use autosign_inventory::{InventoryClient, MemoryInventory, TagSearchBackend, TaggedResource};

const PASSWORD: &str = "s3cr3t-pw";
const KEY: &str = "k3y-9f2b1c";

fn signer(accounts: &[&MemoryInventory], cache_ttl: Option<Duration>) -> Autosigner {
    let backends: Vec<Arc<dyn TagSearchBackend>> = accounts
        .iter()
        .map(|account| Arc::new((*account).clone()) as Arc<dyn TagSearchBackend>)
        .collect();
    Autosigner::builder()
        .inventory(InventoryClient::new(backends))
        .challenge_password(PASSWORD)
        .tag("nd:auth")
        .maybe_cache_ttl(cache_ttl)
        .build()
        .expect("valid signer")
}

fn host(key: &str) -> TaggedResource {
    TaggedResource::new([format!("nd:auth={key}"), "rs_login:state=active".to_string()])
        .with_href("/api/clouds/1/instances/ABC")
}

#[tokio::test]
async fn approves_host_registered_in_one_account() {
    let prod = MemoryInventory::with_resources("1111", [host(KEY), host("someone-else")]);
    let staging = MemoryInventory::new("2222");
    let signer = signer(&[&prod, &staging], None);

    let result = signer.authorize("web-1.example.com", &csr_with(PASSWORD, KEY)).await;

    assert!(result.is_approved(), "denied: {}", result.reason());
    assert_eq!(prod.search_count(), 1);
    assert_eq!(staging.search_count(), 1);
}

#[tokio::test]
async fn configured_bare_tag_approves_registered_host() {
    let config = Config::from_toml(&format!(
        "[global]\nchallenge_password = \"{PASSWORD}\"\ntag = \"mytag\"\n\n\
         [1111]\noath2_token = \"refresh\"\n"
    ))
    .expect("bare tag is a valid configuration");
    let prod = MemoryInventory::with_resources(
        "1111",
        [TaggedResource::new([format!("mytag={KEY}"), "nd:auth=unrelated".to_string()])],
    );
    let backends: Vec<Arc<dyn TagSearchBackend>> = vec![Arc::new(prod.clone())];
    let signer = config.autosigner_over(InventoryClient::new(backends)).expect("valid signer");

    let result = signer.authorize("web-1.example.com", &csr_with(PASSWORD, KEY)).await;
    assert!(result.is_approved(), "denied: {}", result.reason());

    let result = signer.authorize("web-2.example.com", &csr_with(PASSWORD, "other")).await;
    assert_eq!(result.reason(), "Expected exactly one matching tag, found 0");
    assert_eq!(prod.search_count(), 2);
}

#[tokio::test]
async fn approves_pem_request() {
    let prod = MemoryInventory::with_resources("1111", [host(KEY)]);
    let signer = signer(&[&prod], None);
    let pem = CsrBuilder::new()
        .challenge_password(PASSWORD)
        .extension_request(vec![preshared_key_extension(KEY)])
        .to_pem();

    let result = signer.authorize("web-1.example.com", pem.as_bytes()).await;

    assert!(result.is_approved(), "denied: {}", result.reason());
}

#[tokio::test]
async fn denies_key_registered_in_two_accounts() {
    let prod = MemoryInventory::with_resources("1111", [host(KEY)]);
    let staging = MemoryInventory::with_resources("2222", [host(KEY)]);
    let signer = signer(&[&prod, &staging], None);

    let result = signer.authorize("web-1.example.com", &csr_with(PASSWORD, KEY)).await;

    assert!(!result.is_approved());
    assert_eq!(result.reason(), "Expected exactly one matching tag, found 2");
}

#[tokio::test]
async fn denies_unregistered_key() {
    let prod = MemoryInventory::with_resources("1111", [host(&format!("{KEY}-longer"))]);
    let signer = signer(&[&prod], None);

    let result = signer.authorize("web-1.example.com", &csr_with(PASSWORD, KEY)).await;

    assert!(!result.is_approved());
    assert_eq!(result.reason(), "Expected exactly one matching tag, found 0");
}

#[tokio::test]
async fn denies_wrong_password_without_searching() {
    let prod = MemoryInventory::with_resources("1111", [host(KEY)]);
    let signer = signer(&[&prod], None);

    let result = signer.authorize("web-1.example.com", &csr_with("guess", KEY)).await;

    assert!(!result.is_approved());
    assert_eq!(result.reason(), "invalid challenge_password");
    assert_eq!(prod.search_count(), 0);
}

#[tokio::test]
async fn cached_approval_survives_until_ttl() {
    let prod = MemoryInventory::with_resources("1111", [host(KEY)]);
    let signer = signer(&[&prod], Some(Duration::from_secs(300)));

    assert!(signer.authorize("a", &csr_with(PASSWORD, KEY)).await.is_approved());

    // Served from cache even though the inventory changed.
    prod.clear();
    assert!(signer.authorize("a", &csr_with(PASSWORD, KEY)).await.is_approved());
    assert_eq!(prod.search_count(), 1);

    signer.cache().clear();
    assert!(!signer.authorize("a", &csr_with(PASSWORD, KEY)).await.is_approved());
    assert_eq!(prod.search_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_decisions_share_one_signer() {
    let prod = MemoryInventory::with_resources("1111", [host(KEY)]);
    let signer = Arc::new(signer(&[&prod], Some(Duration::from_secs(300))));

    let mut handles = Vec::new();
    for i in 0..16 {
        let signer = Arc::clone(&signer);
        handles.push(tokio::spawn(async move {
            let key = if i % 4 == 0 { "unknown" } else { KEY };
            (key, signer.authorize(&format!("web-{i}"), &csr_with(PASSWORD, key)).await)
        }));
    }

    for handle in handles {
        let (key, result) = handle.await.unwrap();
        assert_eq!(result.is_approved(), key == KEY, "{key}: {}", result.reason());
    }
    assert!(prod.search_count() <= 16);
    assert_eq!(signer.cache().len(), 2);
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn logs_hostname_but_never_secrets() {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let prod = MemoryInventory::with_resources("1111", [host(KEY)]);
    let signer = signer(&[&prod], Some(Duration::from_secs(60)));
    assert!(signer.authorize("web-1.example.com", &csr_with(PASSWORD, KEY)).await.is_approved());
    assert!(!signer.authorize("web-2.example.com", &csr_with("guess", KEY)).await.is_approved());

    let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("web-1.example.com"));
    assert!(logs.contains("web-2.example.com"));
    assert!(logs.contains("signing this request"));
    assert!(!logs.contains(PASSWORD), "password leaked into logs");
    assert!(!logs.contains(KEY), "preshared key leaked into logs");
}
