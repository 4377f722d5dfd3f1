use anyhow::Result;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Files of the serving certificate mounted from the webhook Secret.
pub const CERT_FILES: [&str; 2] = ["tls.crt", "tls.key"];

/// Flags a restart of the TLS server once the mounted certificate changes.
pub struct CertificateReloader {
    should_restart: Arc<AtomicBool>,
}

impl CertificateReloader {
    pub fn new() -> Self {
        Self {
            should_restart: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the certificate changed since the last call.
    pub fn take_restart(&self) -> bool {
        self.should_restart.swap(false, Ordering::Relaxed)
    }

    pub async fn start_watching(&self, cert_dir: &str) -> Result<()> {
        let should_restart = self.should_restart.clone();
        let cert_dir = cert_dir.to_string();

        tokio::spawn(async move {
            if let Err(e) = watch_certificates(&cert_dir, should_restart).await {
                error!("Certificate watcher failed: {}", e);
            }
        });

        Ok(())
    }
}

/// Secret volumes swap a `..data` symlink, so any event naming a certificate file counts.
pub fn touches_certificate(event: &Event) -> bool {
    event.paths.iter().any(|path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| CERT_FILES.contains(&name))
    })
}

async fn watch_certificates(cert_dir: &str, should_restart: Arc<AtomicBool>) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(100);

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Err(e) = tx.blocking_send(res) {
                error!("Failed to send file watcher event: {}", e);
            }
        },
        Config::default(),
    )?;

    watcher.watch(Path::new(cert_dir), RecursiveMode::Recursive)?;
    info!("Started watching certificate directory: {}", cert_dir);

    while let Some(event_result) = rx.recv().await {
        match event_result {
            Ok(event) if touches_certificate(&event) => {
                info!("Certificate files changed - signaling server restart");
                should_restart.store(true, Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(e) => warn!("File watcher error: {}", e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::EventKind;
    use std::path::PathBuf;

    #[test]
    fn only_certificate_files_trigger_a_restart() {
        let event = |path: &str| Event::new(EventKind::Any).add_path(PathBuf::from(path));
        assert!(touches_certificate(&event("/etc/certs/tls.crt")));
        assert!(touches_certificate(&event("/etc/certs/tls.key")));
        assert!(!touches_certificate(&event("/etc/certs/ca.crt")));
        assert!(!CertificateReloader::new().take_restart());
    }
}
