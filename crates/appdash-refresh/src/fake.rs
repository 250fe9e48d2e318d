//! In-memory control plane and roster for tests.
//!
//! Enabled for this crate's own tests and, through the `test-util`
//! feature, for downstream crates' tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use appdash_state::DatabaseInfo;

use crate::client::{ClientError, ClientResult, ControlPlane, NodeFact, Permission, Roster};

/// Scripted control plane. Mutating calls are recorded in `calls`.
#[derive(Default)]
pub struct FakeControlPlane {
    pub apps: Mutex<BTreeMap<String, bool>>,
    pub nodes: Mutex<Vec<NodeFact>>,
    /// Break only the node stats call.
    pub fail_stats: AtomicBool,
    /// Break every call.
    pub fail_everything: AtomicBool,
    pub stats_calls: AtomicUsize,
    pub calls: Mutex<Vec<String>>,
}

impl FakeControlPlane {
    pub fn with_apps<'a>(apps: impl IntoIterator<Item = (&'a str, bool)>) -> Self {
        let cp = Self::default();
        cp.apps
            .lock()
            .unwrap()
            .extend(apps.into_iter().map(|(id, serving)| (id.to_string(), serving)));
        cp
    }

    pub fn recorded_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self) -> ClientResult<()> {
        if self.fail_everything.load(Ordering::SeqCst) {
            Err(ClientError::Unavailable("control plane down".into()))
        } else {
            Ok(())
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn get_host_with_role(&self, _role: &str) -> ClientResult<String> {
        self.check()?;
        Ok("10.0.0.1".into())
    }

    async fn get_database_information(&self) -> ClientResult<DatabaseInfo> {
        self.check()?;
        Ok(DatabaseInfo {
            table: "cassandra".into(),
            replication: "3".into(),
        })
    }

    async fn get_api_status(&self) -> ClientResult<BTreeMap<String, String>> {
        self.check()?;
        Ok(BTreeMap::from([("memcache".to_string(), "running".to_string())]))
    }

    async fn get_stats(&self) -> ClientResult<Vec<NodeFact>> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        if self.fail_stats.load(Ordering::SeqCst) {
            return Err(ClientError::Malformed("garbled stats".into()));
        }
        Ok(self.nodes.lock().unwrap().clone())
    }

    async fn get_app_status(&self) -> ClientResult<BTreeMap<String, bool>> {
        self.check()?;
        Ok(self.apps.lock().unwrap().clone())
    }

    async fn upload_app(&self, filename: &str, archive: Bytes) -> ClientResult<String> {
        self.check()?;
        self.record(format!("upload {filename} {}", archive.len()));
        Ok(format!("Uploaded {filename}"))
    }

    async fn delete_app(&self, app_id: &str) -> ClientResult<String> {
        self.check()?;
        self.record(format!("delete {app_id}"));
        self.apps.lock().unwrap().remove(app_id);
        Ok(format!("Deleted {app_id}"))
    }

    async fn relocate_app(
        &self,
        app_id: &str,
        http_port: u16,
        https_port: u16,
    ) -> ClientResult<String> {
        self.check()?;
        self.record(format!("relocate {app_id} {http_port} {https_port}"));
        Ok(format!("Relocated {app_id}"))
    }

    async fn gather_logs(&self) -> ClientResult<String> {
        self.check()?;
        self.record("gather logs".to_string());
        Ok("3f2a9c1e-logs".into())
    }

    async fn run_groomer(&self) -> ClientResult<String> {
        self.check()?;
        self.record("run groomer".to_string());
        Ok("groomer started".into())
    }
}

/// A roster user: admin flag, upload flag, owned apps.
#[derive(Debug, Clone, Default)]
pub struct FakeUser {
    pub admin: bool,
    pub upload: bool,
    pub apps: Vec<String>,
}

/// Scripted roster service.
#[derive(Default)]
pub struct FakeRoster {
    pub users: Mutex<BTreeMap<String, FakeUser>>,
    pub passwords: Mutex<HashMap<String, String>>,
    pub ports: Mutex<HashMap<String, u16>>,
}

impl FakeRoster {
    pub fn add_user(&self, email: &str, admin: bool, upload: bool, apps: &[&str]) {
        self.users.lock().unwrap().insert(
            email.to_string(),
            FakeUser {
                admin,
                upload,
                apps: apps.iter().map(|a| a.to_string()).collect(),
            },
        );
    }

    pub fn set_port(&self, app_id: &str, port: u16) {
        self.ports.lock().unwrap().insert(app_id.to_string(), port);
    }

    fn user(&self, email: &str) -> FakeUser {
        self.users.lock().unwrap().get(email).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Roster for FakeRoster {
    async fn list_all_users(&self) -> ClientResult<Vec<String>> {
        Ok(self.users.lock().unwrap().keys().cloned().collect())
    }

    async fn is_user_admin(&self, email: &str) -> ClientResult<bool> {
        Ok(self.user(email).admin)
    }

    async fn can_upload(&self, email: &str) -> ClientResult<bool> {
        Ok(self.user(email).upload)
    }

    async fn get_user_app_list(&self, email: &str) -> ClientResult<Vec<String>> {
        Ok(self.user(email).apps)
    }

    async fn get_app_port(&self, app_id: &str) -> ClientResult<u16> {
        self.ports
            .lock()
            .unwrap()
            .get(app_id)
            .copied()
            .ok_or_else(|| ClientError::Rejected(format!("no port for {app_id}")))
    }

    async fn get_login_host(&self) -> ClientResult<String> {
        Ok("apps.example.com".into())
    }

    async fn create_user(&self, email: &str, password: &str) -> ClientResult<()> {
        let mut users = self.users.lock().unwrap();
        if users.contains_key(email) {
            return Err(ClientError::Rejected(format!("{email} already exists")));
        }
        users.insert(email.to_string(), FakeUser::default());
        self.passwords
            .lock()
            .unwrap()
            .insert(email.to_string(), password.to_string());
        Ok(())
    }

    async fn change_password(&self, email: &str, password: &str) -> ClientResult<()> {
        if !self.users.lock().unwrap().contains_key(email) {
            return Err(ClientError::Rejected(format!("no user {email}")));
        }
        self.passwords
            .lock()
            .unwrap()
            .insert(email.to_string(), password.to_string());
        Ok(())
    }

    async fn set_permission(
        &self,
        email: &str,
        permission: Permission,
        enabled: bool,
    ) -> ClientResult<()> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(email)
            .ok_or_else(|| ClientError::Rejected(format!("no user {email}")))?;
        match permission {
            Permission::UploadApp => user.upload = enabled,
        }
        Ok(())
    }
}
