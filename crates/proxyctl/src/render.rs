//! Configuration template rendering
//!
//! Substitutes deployment values into the per-mode configuration templates
//! and writes the artifact the serving process reads. The routing content
//! of the templates belongs to the proxy deployment; this module only owns
//! substitution and atomic placement.
//!
//! Template variables use `${NAME}` syntax:
//!
//! - `${DOMAIN}` - primary domain
//! - `${SERVER_NAMES}` - space-joined full domain set
//! - `${CERT_PATH}` / `${KEY_PATH}` - bundle paths in the shared store
//! - `${CHALLENGE_ROOT}` - ACME webroot directory
//! - `${MAX_BODY_SIZE}` - request body size limit

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use certflow_common::{ACME_CHALLENGE_PREFIX, FULLCHAIN_FILE, PRIVKEY_FILE};
use certflow_config::Settings;

use crate::mode::ConfigMode;

/// Errors raised while rendering a configuration variant
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template not found: {0}")]
    MissingTemplate(PathBuf),

    #[error("Unresolved template variable '${{{name}}}' in {template}")]
    UnresolvedVariable { name: String, template: PathBuf },
}

/// Renders configuration variants from the template directory
#[derive(Debug, Clone)]
pub struct Renderer {
    template_dir: PathBuf,
    vars: Vec<(&'static str, String)>,
}

impl Renderer {
    /// Build a renderer with the substitution set derived from settings
    pub fn from_settings(settings: &Settings) -> Self {
        let domain_dir = settings.cert_root.join(&settings.domain);
        let vars = vec![
            ("DOMAIN", settings.domain.clone()),
            ("SERVER_NAMES", settings.all_domains().join(" ")),
            (
                "CERT_PATH",
                domain_dir.join(FULLCHAIN_FILE).display().to_string(),
            ),
            (
                "KEY_PATH",
                domain_dir.join(PRIVKEY_FILE).display().to_string(),
            ),
            (
                "CHALLENGE_ROOT",
                settings.challenge_root.display().to_string(),
            ),
            ("MAX_BODY_SIZE", settings.max_body_size.clone()),
        ];

        Self {
            template_dir: settings.template_dir.clone(),
            vars,
        }
    }

    /// Render one variant to a string
    ///
    /// # Errors
    ///
    /// Fails if the template is missing or still contains `${...}`
    /// references after substitution.
    pub fn render(&self, mode: ConfigMode) -> Result<String, RenderError> {
        let template_path = self.template_dir.join(mode.template_file());
        let template = match fs::read_to_string(&template_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RenderError::MissingTemplate(template_path));
            }
            Err(e) => return Err(e.into()),
        };

        let mut rendered = template;
        for (name, value) in &self.vars {
            rendered = rendered.replace(&format!("${{{name}}}"), value);
        }

        if let Some(name) = first_unresolved(&rendered) {
            return Err(RenderError::UnresolvedVariable {
                name,
                template: template_path,
            });
        }

        if mode.serves_challenges() && !rendered.contains(ACME_CHALLENGE_PREFIX) {
            warn!(
                mode = %mode,
                template = %template_path.display(),
                "Rendered configuration does not expose the ACME challenge \
                 path; domain validation will fail"
            );
        }

        debug!(
            mode = %mode,
            template = %template_path.display(),
            bytes = rendered.len(),
            "Rendered configuration variant"
        );

        Ok(rendered)
    }

    /// Render one variant and atomically place it at `dest`
    ///
    /// The artifact is written next to its destination and renamed into
    /// place, so the serving process never reads a torn configuration.
    pub fn render_to(&self, mode: ConfigMode, dest: &Path) -> Result<(), RenderError> {
        let rendered = self.render(mode)?;
        write_atomic(dest, &rendered)?;
        debug!(mode = %mode, dest = %dest.display(), "Wrote configuration artifact");
        Ok(())
    }
}

/// Write content to a sibling temp file and rename into place
pub(crate) fn write_atomic(dest: &Path, content: &str) -> Result<(), std::io::Error> {
    let tmp = dest.with_extension("conf.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, dest)?;
    Ok(())
}

/// Find the first `${NAME}` reference left in rendered output
fn first_unresolved(rendered: &str) -> Option<String> {
    let start = rendered.find("${")?;
    let rest = &rendered[start + 2..];
    let end = rest.find('}')?;
    Some(rest[..end].to_string())
}
