use std::fs::File;
use std::io::{Cursor, Read};
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use panelsite_core::assets::AssetManifest;
use panelsite_core::model::Project;
use panelsite_core::navigator::ChapterNavigator;
use panelsite_core::render::DeferredLoader;
use panelsite_core::templates::{SiteRenderer, TemplateSet};
use panelsite_core::url::LEGACY_READER_OUTPUT;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, warn};

pub struct PreviewOpts {
    pub out_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub no_open: bool,
    pub index: String,
    /// Serves `chapter.html?id=N` by rendering the requested chapter.
    pub live: Option<LiveReader>,
}

/// Renders legacy query links on request instead of serving the redirect page.
pub struct LiveReader {
    pub project: Project,
    pub templates: TemplateSet,
    pub asset_manifest: AssetManifest,
}

impl LiveReader {
    fn render(&self, query: Option<&str>) -> Result<String> {
        let navigator = ChapterNavigator::from_query(&self.project.edition, query);
        let chapter = navigator.current_chapter_id();
        debug!(%chapter, ?query, "live chapter request");
        let build_date = chrono::Local::now().format("%Y-%m-%d").to_string();
        let renderer =
            SiteRenderer::new(&self.project, &self.templates, &self.asset_manifest, build_date);
        let rendered =
            renderer.render_chapter_page(chapter, Path::new(LEGACY_READER_OUTPUT), &DeferredLoader)?;
        Ok(rendered.html)
    }
}

pub struct PreviewHandle {
    pub url: String,
    shutdown: Arc<AtomicBool>,
    join: JoinHandle<Result<()>>,
}

impl PreviewHandle {
    pub fn stop(self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        match self.join.join() {
            Ok(result) => result,
            Err(_) => anyhow::bail!("preview thread panicked"),
        }
    }
}

pub fn run_preview(opts: PreviewOpts) -> Result<()> {
    validate_out_dir(&opts.out_dir)?;
    let (server, addr) = bind_server(&opts.host, opts.port)?;
    let url = preview_url(&opts.host, addr);

    println!("Preview: {url}");
    println!("Serving: {}", opts.out_dir.display());

    if !opts.no_open {
        if let Err(err) = webbrowser::open(&url) {
            warn!(%err, "failed to open browser");
        }
    }

    serve_loop(server, opts.out_dir, opts.index, opts.live, None)
}

pub fn spawn_preview(opts: PreviewOpts) -> Result<PreviewHandle> {
    validate_out_dir(&opts.out_dir)?;
    let (server, addr) = bind_server(&opts.host, opts.port)?;
    let url = preview_url(&opts.host, addr);
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_thread = shutdown.clone();
    let PreviewOpts {
        out_dir,
        index,
        live,
        ..
    } = opts;
    let join =
        thread::spawn(move || serve_loop(server, out_dir, index, live, Some(shutdown_thread)));

    Ok(PreviewHandle { url, shutdown, join })
}

fn validate_out_dir(out_dir: &Path) -> Result<()> {
    if !out_dir.is_dir() {
        anyhow::bail!("Output dir does not exist. Run `panelsite_cli build` first or pass --out.");
    }
    Ok(())
}

fn bind_server(host: &str, port: u16) -> Result<(Server, SocketAddr)> {
    let addr = format!("{host}:{port}");
    let server = Server::http(&addr)
        .map_err(|err| anyhow::anyhow!("failed to bind to {addr}: {err}"))?;
    let actual = server
        .server_addr()
        .to_ip()
        .ok_or_else(|| anyhow::anyhow!("failed to resolve socket address"))?;
    Ok((server, actual))
}

fn preview_url(host: &str, addr: SocketAddr) -> String {
    format!("http://{host}:{}/", addr.port())
}

fn serve_loop(
    server: Server,
    out_dir: PathBuf,
    index: String,
    live: Option<LiveReader>,
    shutdown: Option<Arc<AtomicBool>>,
) -> Result<()> {
    loop {
        if shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
        {
            break;
        }

        let request = match server.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(err) => return Err(err.into()),
        };

        let response = match handle_request(&request, &out_dir, &index, live.as_ref()) {
            Ok(response) => response,
            Err(err) => {
                warn!(url = request.url(), "{err:#}");
                Response::from_string("Internal Server Error")
                    .with_status_code(StatusCode(500))
                    .boxed()
            }
        };

        if let Err(err) = request.respond(response) {
            warn!(%err, "failed to send response");
        }
    }
    Ok(())
}

fn not_found() -> Response<Box<dyn Read + Send>> {
    Response::from_string("Not Found")
        .with_status_code(StatusCode(404))
        .boxed()
}

fn handle_request(
    request: &tiny_http::Request,
    out_dir: &Path,
    index: &str,
    live: Option<&LiveReader>,
) -> Result<Response<Box<dyn Read + Send>>> {
    if request.method() != &Method::Get && request.method() != &Method::Head {
        return Ok(Response::from_string("Method Not Allowed")
            .with_status_code(StatusCode(405))
            .boxed());
    }

    let Some(rel_path) = sanitize_path(request.url(), index) else {
        return Ok(not_found());
    };

    if let Some(live) = live {
        if rel_path == Path::new(LEGACY_READER_OUTPUT) {
            let query = request.url().split_once('?').map(|(_, query)| query);
            let html = live.render(query)?;
            let header = content_type_header(&rel_path);
            if request.method() == &Method::Head {
                return Ok(Response::empty(200).with_header(header).boxed());
            }
            let len = html.len();
            return Ok(Response::new(
                StatusCode(200),
                vec![header],
                Box::new(Cursor::new(html.into_bytes())) as Box<dyn Read + Send>,
                Some(len),
                None,
            ));
        }
    }

    let mut full_path = out_dir.join(&rel_path);
    if full_path.is_dir() {
        full_path = full_path.join(index);
    }
    if !full_path.is_file() {
        return Ok(not_found());
    }

    let file = File::open(&full_path)
        .with_context(|| format!("failed to open {}", full_path.display()))?;

    if request.method() == &Method::Head {
        return Ok(Response::empty(200)
            .with_header(content_type_header(&full_path))
            .boxed());
    }

    Ok(Response::from_file(file)
        .with_header(content_type_header(&full_path))
        .boxed())
}

fn sanitize_path(url: &str, index: &str) -> Option<PathBuf> {
    let path = url.split('?').next().unwrap_or(url);
    let decoded = urlencoding::decode(path).ok()?;
    if decoded.contains('\\') {
        return None;
    }
    let trimmed = decoded.trim_start_matches('/');
    let effective = if trimmed.is_empty() { index } else { trimmed };

    let mut clean = PathBuf::new();
    for component in Path::new(effective).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()).unwrap_or("") {
        "html" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        _ => "application/octet-stream",
    }
}

fn content_type_header(path: &Path) -> Header {
    Header::from_bytes("Content-Type", content_type_for(path)).expect("valid header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_rejects_traversal_and_decodes_spaces() {
        assert_eq!(sanitize_path("/../secret", "index.html"), None);
        assert_eq!(
            sanitize_path("/images/chapter%201/01.jpg", "index.html"),
            Some(PathBuf::from("images/chapter 1/01.jpg"))
        );
        assert_eq!(
            sanitize_path("/?id=4", "index.html"),
            Some(PathBuf::from("index.html"))
        );
        assert_eq!(
            sanitize_path("/chapter.html?id=90.2", "index.html"),
            Some(PathBuf::from("chapter.html"))
        );
    }
}
