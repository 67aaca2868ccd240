use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use trellis::{Dispatcher, ExecutorImpl, ProcessorBuilder, RequestSpec, Status, SyncExecutor, TrellisError};

// Many small per-request allocations across worker threads.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Dispatches requests through a sitemap and prints what each produced.
#[derive(Parser, Debug)]
#[command(name = "trellis", version, about)]
struct Cli {
    /// Sitemap file, or a directory holding sitemap.xmap
    sitemap: PathBuf,

    /// Request URIs, relative to the sitemap
    #[arg(required = true)]
    uris: Vec<String>,

    /// Request parameter applied to every request
    #[arg(short, long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Do not rebuild the tree when the sitemap changes
    #[arg(long)]
    no_reload: bool,

    /// Process requests one after another on the main thread
    #[arg(long)]
    sequential: bool,

    /// Worker threads for parallel dispatch (defaults to the CPU count)
    #[arg(long)]
    threads: Option<usize>,

    /// Only assemble each request's pipeline and print it
    #[arg(long)]
    describe: bool,

    /// Print outcomes as JSON lines instead of bodies
    #[arg(long)]
    json: bool,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))
}

fn executor(cli: &Cli) -> ExecutorImpl {
    if cli.sequential {
        return ExecutorImpl::Sync(SyncExecutor::new());
    }

    #[cfg(feature = "rayon-executor")]
    {
        let threads = cli.threads.unwrap_or_else(num_cpus::get);
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
        {
            log::warn!("Could not size the thread pool to {threads}: {e}");
        }
        ExecutorImpl::Rayon(trellis::RayonExecutor::new())
    }
    #[cfg(not(feature = "rayon-executor"))]
    {
        if cli.threads.is_some() {
            log::warn!("Built without rayon; --threads is ignored");
        }
        ExecutorImpl::Sync(SyncExecutor::new())
    }
}

fn requests(cli: &Cli) -> Vec<RequestSpec> {
    cli.uris
        .iter()
        .map(|uri| {
            cli.params
                .iter()
                .fold(RequestSpec::new(uri.as_str()), |spec, (name, value)| {
                    spec.with_parameter(name.as_str(), value.as_str())
                })
        })
        .collect()
}

/// Runs the requests and disposes the dispatcher whatever the outcome.
fn execute(cli: &Cli, dispatcher: &Dispatcher, out: &mut impl Write) -> Result<ExitCode, TrellisError> {
    let result = run(cli, dispatcher, out);
    dispatcher.dispose();
    result
}

fn run(cli: &Cli, dispatcher: &Dispatcher, out: &mut impl Write) -> Result<ExitCode, TrellisError> {
    let requests = requests(cli);

    if cli.describe {
        for request in &requests {
            match dispatcher.describe_pipeline(request)? {
                Some(description) => writeln!(out, "{}: {description}", request.uri)?,
                None => writeln!(out, "{}: no match", request.uri)?,
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let outcomes = dispatcher.dispatch_all(requests);
    let mut failed = false;
    for outcome in &outcomes {
        failed |= !outcome.is_success();
        if cli.json {
            let line = serde_json::to_string(outcome)
                .map_err(|e| TrellisError::Config(format!("cannot encode outcome: {e}")))?;
            writeln!(out, "{line}")?;
            continue;
        }

        match outcome.status {
            Status::Ok => {
                writeln!(
                    out,
                    "== {} ({}, {} bytes)",
                    outcome.uri,
                    outcome.content_type.as_deref().unwrap_or("unknown type"),
                    outcome.body_length
                )?;
                out.write_all(&outcome.body)?;
                writeln!(out)?;
            }
            Status::Redirect => writeln!(
                out,
                "== {} -> {}",
                outcome.uri,
                outcome.redirect.as_deref().unwrap_or_default()
            )?,
            Status::NoMatch | Status::NotFound => writeln!(out, "== {} not found", outcome.uri)?,
            Status::Error => writeln!(
                out,
                "== {} failed: {}",
                outcome.uri,
                outcome.error.as_deref().unwrap_or_default()
            )?,
        }
    }

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn main() -> Result<ExitCode, TrellisError> {
    env_logger::init();
    let cli = Cli::parse();

    let dispatcher = ProcessorBuilder::new()
        .with_sitemap(&cli.sitemap)
        .with_check_reload(!cli.no_reload)
        .with_executor(executor(&cli))
        .build()?;

    execute(&cli, &dispatcher, &mut std::io::stdout().lock())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use trellis::core::SITEMAP_NAMESPACE;
    use trellis::traits::InMemoryResourceProvider;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn dispatcher() -> Dispatcher {
        let sitemap = format!(
            r#"<map:sitemap xmlns:map="{SITEMAP_NAMESPACE}"><map:pipelines><map:pipeline>
                 <map:match pattern="page"><map:read src="page.txt"/></map:match>
               </map:pipeline></map:pipelines></map:sitemap>"#
        );
        let provider = Arc::new(InMemoryResourceProvider::new());
        provider.add("sitemap.xmap", sitemap).unwrap();
        provider.add("page.txt", "hello").unwrap();
        ProcessorBuilder::new()
            .with_provider(provider)
            .with_sitemap("sitemap.xmap")
            .with_executor(ExecutorImpl::Sync(SyncExecutor::new()))
            .build()
            .unwrap()
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(["trellis", "sitemap.xmap"].into_iter().chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_dispatch_writes_bodies_and_disposes() {
        let dispatcher = dispatcher();
        let mut out = Vec::new();
        let code = execute(&cli(&["page", "missing"]), &dispatcher, &mut out).unwrap();

        assert_eq!(code, ExitCode::FAILURE);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("hello"));
        assert!(text.contains("== missing not found"));
        assert!(dispatcher.processor().tree().is_err());
    }

    #[test]
    fn test_describe_disposes() {
        let dispatcher = dispatcher();
        let mut out = Vec::new();
        let code = execute(&cli(&["--describe", "page"]), &dispatcher, &mut out).unwrap();

        assert_eq!(code, ExitCode::SUCCESS);
        assert_eq!(String::from_utf8(out).unwrap(), "page: read:resource(page.txt)\n");
        assert!(dispatcher.processor().tree().is_err());
    }

    #[test]
    fn test_write_failure_still_disposes() {
        let dispatcher = dispatcher();
        let err = execute(&cli(&["page"]), &dispatcher, &mut ClosedPipe).unwrap_err();

        assert!(matches!(err, TrellisError::Io(_)));
        assert!(dispatcher.processor().tree().is_err());
    }
}
