//! Cache-then-bypass reconciliation against scripted vault and database fakes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;

use pamx_core::{
    ConnectError, ConnectParams, ConnectionReconciler, Connector, CredentialSource, FailureReason,
    SourceError, VaultStatus,
};

/// What the fake vault answers for one cache mode.
#[derive(Clone)]
enum Answer {
    Credential { password: &'static str, extension_type: &'static str },
    Status(&'static str),
    Fail,
}

fn credential(password: &'static str) -> Answer {
    Answer::Credential {
        password,
        extension_type: "mssql",
    }
}

impl Answer {
    fn render(&self) -> Result<String, SourceError> {
        match self {
            Answer::Credential {
                password,
                extension_type,
            } => Ok(format!(
                "<CSPMResponse><errorcode>400</errorcode><credential>\
                 <TargetServer><hostName>db1.pam.local</hostName></TargetServer>\
                 <TargetApplication><extensionType>{extension_type}</extensionType>\
                 <Attribute.port>1433</Attribute.port></TargetApplication>\
                 <TargetAccount><userName>hr_app</userName><password>{password}</password></TargetAccount>\
                 </credential></CSPMResponse>"
            )),
            Answer::Status(code) => Ok(format!(
                "<CSPMResponse><errorcode>{code}</errorcode></CSPMResponse>"
            )),
            Answer::Fail => Err(SourceError::Timeout(Duration::from_secs(30))),
        }
    }
}

/// Vault fake: separate answers for cached and bypass queries.
struct ScriptedVault {
    cached: Answer,
    bypass: Answer,
    calls: Mutex<Vec<bool>>,
}

impl ScriptedVault {
    fn new(cached: Answer, bypass: Answer) -> Self {
        Self {
            cached,
            bypass,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<bool> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialSource for ScriptedVault {
    async fn retrieve(&self, alias: &str, bypass_cache: bool) -> Result<String, SourceError> {
        assert_eq!(alias, "mssql-hr");
        self.calls.lock().unwrap().push(bypass_cache);
        if bypass_cache {
            self.bypass.render()
        } else {
            self.cached.render()
        }
    }
}

/// Database fake accepting one password.
struct FakeDatabase {
    accepted: &'static str,
    delay: Option<Duration>,
    attempts: AtomicUsize,
}

impl FakeDatabase {
    fn accepting(accepted: &'static str) -> Self {
        Self {
            accepted,
            delay: None,
            attempts: AtomicUsize::new(0),
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeDatabase {
    type Connection = String;

    async fn connect(&self, params: &ConnectParams<'_>) -> Result<String, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        assert_eq!(params.driver, "mssql");
        assert_eq!(params.host, "db1.pam.local");
        assert_eq!(params.port, Some(1433));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if params.password.expose_secret() == self.accepted {
            Ok(format!("session:{}", params.username))
        } else {
            Err(ConnectError::rejected("Login failed for user 'hr_app'"))
        }
    }
}

type Reconciler<'a> = ConnectionReconciler<&'a ScriptedVault, &'a FakeDatabase>;

fn reconciler<'a>(vault: &'a ScriptedVault, db: &'a FakeDatabase) -> Reconciler<'a> {
    ConnectionReconciler::new(vault, db, "mssql").with_connect_timeout(Duration::from_millis(200))
}

#[tokio::test]
async fn test_cached_credential_connects() {
    let vault = ScriptedVault::new(credential("A"), credential("B"));
    let db = FakeDatabase::accepting("A");

    let outcome = reconciler(&vault, &db).acquire("mssql-hr").await;

    assert!(outcome.is_connected());
    assert!(!outcome.bypassed);
    assert_eq!(outcome.connection.as_deref(), Some("session:hr_app"));
    assert_eq!(vault.calls(), vec![false]);
    assert_eq!(db.attempts(), 1);
}

#[tokio::test]
async fn test_stale_cache_recovers_with_bypass_credential() {
    let vault = ScriptedVault::new(credential("A"), credential("B"));
    let db = FakeDatabase::accepting("B");

    let outcome = reconciler(&vault, &db).acquire("mssql-hr").await;

    assert!(outcome.is_connected());
    assert!(outcome.bypassed);
    assert!(outcome.failure.is_none());
    assert_eq!(outcome.target().unwrap().password.expose_secret(), "B");
    assert_eq!(vault.calls(), vec![false, true]);
    assert_eq!(db.attempts(), 2);
}

#[tokio::test]
async fn test_unchanged_password_is_not_retried() {
    let vault = ScriptedVault::new(credential("A"), credential("A"));
    let db = FakeDatabase::accepting("other");

    let outcome = reconciler(&vault, &db).acquire("mssql-hr").await;

    assert!(!outcome.is_connected());
    match outcome.failure {
        Some(FailureReason::CredentialsUnchanged { error }) => {
            assert!(error.contains("Login failed"));
        },
        other => panic!("expected CredentialsUnchanged, got {:?}", other),
    }
    assert_eq!(vault.calls(), vec![false, true]);
    assert_eq!(db.attempts(), 1);
}

#[tokio::test]
async fn test_bypass_credential_also_rejected() {
    let vault = ScriptedVault::new(credential("A"), credential("B"));
    let db = FakeDatabase::accepting("C");

    let outcome = reconciler(&vault, &db).acquire("mssql-hr").await;

    assert!(matches!(
        outcome.failure,
        Some(FailureReason::BypassCredentialRejected { .. })
    ));
    assert!(outcome.bypassed);
    assert_eq!(db.attempts(), 2);
}

#[tokio::test]
async fn test_cached_vault_rejection_skips_connection() {
    let vault = ScriptedVault::new(Answer::Status("404"), credential("B"));
    let db = FakeDatabase::accepting("B");

    let outcome = reconciler(&vault, &db).acquire("mssql-hr").await;

    assert_eq!(
        outcome.failure,
        Some(FailureReason::VaultRejected {
            status: VaultStatus::Other("404".into())
        })
    );
    assert_eq!(vault.calls(), vec![false]);
    assert_eq!(db.attempts(), 0);
}

#[tokio::test]
async fn test_client_failure_is_generic_rejection() {
    let vault = ScriptedVault::new(Answer::Fail, credential("B"));
    let db = FakeDatabase::accepting("B");

    let outcome = reconciler(&vault, &db).acquire("mssql-hr").await;

    assert_eq!(
        outcome.failure,
        Some(FailureReason::VaultRejected {
            status: VaultStatus::GenericFailure
        })
    );
    assert_eq!(db.attempts(), 0);
}

#[tokio::test]
async fn test_wrong_extension_type_is_415() {
    let vault = ScriptedVault::new(
        Answer::Credential {
            password: "A",
            extension_type: "oracle",
        },
        credential("B"),
    );
    let db = FakeDatabase::accepting("A");

    let outcome = reconciler(&vault, &db).acquire("mssql-hr").await;

    assert_eq!(
        outcome.failure,
        Some(FailureReason::VaultRejected {
            status: VaultStatus::UnsupportedType
        })
    );
    let doc = outcome.credential.unwrap();
    assert_eq!(doc.extension_type.as_deref(), Some("oracle"));
    assert_eq!(db.attempts(), 0);
}

#[tokio::test]
async fn test_bypass_fetch_failure() {
    let vault = ScriptedVault::new(credential("A"), Answer::Status("401"));
    let db = FakeDatabase::accepting("B");

    let outcome = reconciler(&vault, &db).acquire("mssql-hr").await;

    assert_eq!(
        outcome.failure,
        Some(FailureReason::BypassFetchFailed {
            status: VaultStatus::Unauthorized
        })
    );
    assert_eq!(db.attempts(), 1);
}

#[tokio::test]
async fn test_slow_cached_attempt_times_out_and_bypasses() {
    let vault = ScriptedVault::new(credential("A"), credential("B"));
    let db = FakeDatabase {
        accepted: "B",
        delay: Some(Duration::from_millis(50)),
        attempts: AtomicUsize::new(0),
    };

    let outcome = ConnectionReconciler::new(&vault, &db, "mssql")
        .with_connect_timeout(Duration::from_millis(5))
        .acquire("mssql-hr")
        .await;

    // Both attempts exceed the bound; the second failure is reported.
    match outcome.failure {
        Some(FailureReason::BypassCredentialRejected { error }) => {
            assert!(error.contains("timed out"));
        },
        other => panic!("expected timeout rejection, got {:?}", other),
    }
    assert_eq!(db.attempts(), 2);
}
