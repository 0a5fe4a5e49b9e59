//! Template-serving handler.
//!
//! Files are read and parsed on every request, so edits show up without a
//! restart. The first file is rendered; the others are available to it by
//! their base file name (`{% include "nav.html" %}`).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use http::StatusCode;
use minijinja::{Environment, Value};
use tracing::error;

use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::response::Response;

/// Builds the handler for [`Server::serve_template`](crate::Server::serve_template).
pub(crate) fn handler(data: Value, files: Vec<PathBuf>) -> BoxedHandler {
    let files: Arc<[PathBuf]> = files.into();
    BoxedHandler::new(move |_req: Request| {
        let data = data.clone();
        let files = Arc::clone(&files);
        async move {
            match render(&data, &files).await {
                Ok(html) => Response::html(html),
                Err(e) => {
                    error!("template: {e}");
                    Response::status(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        }
    })
}

/// Why a template request could not be rendered.
#[derive(Debug, thiserror::Error)]
enum TemplateError {
    #[error("no template files given")]
    NoFiles,

    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Template(#[from] minijinja::Error),
}

async fn render(data: &Value, files: &[PathBuf]) -> Result<String, TemplateError> {
    let mut sources = Vec::with_capacity(files.len());
    for path in files {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| TemplateError::Read { path: path.clone(), source })?;
        sources.push((template_name(path), source));
    }
    let main = sources.first().map(|(name, _)| name.clone()).ok_or(TemplateError::NoFiles)?;

    let mut env = Environment::new();
    for (name, source) in sources {
        env.add_template_owned(name, source)?;
    }
    Ok(env.get_template(&main)?.render(data)?)
}

/// Base file name, so `templates/index.html` is `index.html`.
fn template_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
