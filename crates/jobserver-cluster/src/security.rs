use std::path::PathBuf;

use log::info;
use tokio::process::Command;

use crate::error::{ClusterError, ClusterResult};

/// How the job server authenticates against a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterSecurityProfile {
    Simple { user: String },
    Kerberos(KerberosProfile),
}

impl ClusterSecurityProfile {
    pub fn authentication(&self) -> &'static str {
        match self {
            ClusterSecurityProfile::Simple { .. } => "simple",
            ClusterSecurityProfile::Kerberos(_) => "kerberos",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KerberosProfile {
    pub principal: String,
    pub keytab_path: PathBuf,
    pub krb5_conf_path: PathBuf,
    pub credential_cache: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Simple {
        user: String,
    },
    Kerberos {
        principal: String,
        credential_cache: PathBuf,
    },
}

/// The identity a unit of work runs as for a cluster.
/// Work that talks to the cluster receives the context explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityContext {
    pub cluster_code: String,
    pub identity: Identity,
}

impl SecurityContext {
    pub fn user(&self) -> &str {
        match &self.identity {
            Identity::Simple { user } => user,
            Identity::Kerberos { principal, .. } => principal,
        }
    }

    /// Environment variables for child processes acting on behalf of the identity.
    pub fn environment(&self) -> Vec<(String, String)> {
        match &self.identity {
            Identity::Simple { user } => vec![("HADOOP_USER_NAME".to_string(), user.clone())],
            Identity::Kerberos {
                credential_cache, ..
            } => vec![(
                "KRB5CCNAME".to_string(),
                format!("FILE:{}", credential_cache.display()),
            )],
        }
    }
}

#[async_trait::async_trait]
pub trait KerberosLogin: Send + Sync + 'static {
    async fn login(&self, profile: &KerberosProfile) -> ClusterResult<()>;
}

/// Obtains a ticket with the `kinit` command line tool.
pub struct KinitLogin {
    program: String,
}

impl KinitLogin {
    pub fn new() -> Self {
        Self {
            program: "kinit".to_string(),
        }
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for KinitLogin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl KerberosLogin for KinitLogin {
    async fn login(&self, profile: &KerberosProfile) -> ClusterResult<()> {
        let output = Command::new(&self.program)
            .arg("-kt")
            .arg(&profile.keytab_path)
            .arg("-c")
            .arg(&profile.credential_cache)
            .arg(&profile.principal)
            .env("KRB5_CONFIG", &profile.krb5_conf_path)
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(ClusterError::internal(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        info!("obtained Kerberos ticket for {}", profile.principal);
        Ok(())
    }
}
