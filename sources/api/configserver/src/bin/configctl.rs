/*!
configctl runs configuration resource requests against a filesystem resource store, the same way
a routing layer in front of configserver would.  It's useful for inspecting and repairing a
store by hand.

Examples:

    configctl --datastore-path /var/lib/configsvc request au-state get 'plugin&au'
    configctl request config put expert --input expert.xml --content-type text/xml
    configctl request au-state patch 'plugin&au' --if-match '"1697040000123"' --input patch.json
    configctl list-au-configs

Settings not given on the command line come from the TOML configuration file, by default
/etc/configsvc.toml.
*/

#![deny(rust_2018_idioms)]

#[macro_use]
extern crate log;

use argh::FromArgs;
use bytes::Bytes;
use configserver::config::DEFAULT_CONFIG_PATH;
use configserver::server::envelope::{multipart_content_type, random_boundary, stamp_headers};
use configserver::{
    Envelope, KindName, Method, Outcome, Payload, Preconditions, Request, ResourceService,
    ServiceConfig, V3IdentityResolver,
};
use configstore::FilesystemResourceStore;
use http::header::{
    HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    IF_UNMODIFIED_SINCE,
};
use simplelog::{ColorChoice, Config as LogConfig, LevelFilter, TermLogger, TerminalMode};
use snafu::{OptionExt, ResultExt};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;

type Result<T> = std::result::Result<T, error::Error>;

/// Runs configuration resource requests against a filesystem resource store.
#[derive(FromArgs, Debug)]
struct Args {
    /// service configuration file (default /etc/configsvc.toml)
    #[argh(option)]
    config: Option<PathBuf>,
    /// resource store directory, overriding the configuration file
    #[argh(option)]
    datastore_path: Option<PathBuf>,
    /// log-level trace|debug|info|warn|error
    #[argh(option)]
    log_level: Option<LevelFilter>,
    #[argh(subcommand)]
    subcommand: Subcommand,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum Subcommand {
    Request(RequestArgs),
    ListAuConfigs(ListAuConfigsArgs),
}

/// Runs one request against one resource
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "request")]
struct RequestArgs {
    /// resource kind: config, au-config, au-state, au-agreements, au-suspect-urls,
    /// au-noau-peers, or user-account
    #[argh(positional)]
    kind: KindName,
    /// GET, PUT, PATCH, or DELETE
    #[argh(positional)]
    method: Method,
    /// resource name, e.g. a config section name or an AUID
    #[argh(positional)]
    name: String,
    /// ETags the resource must have, comma-separated and quoted, or '*'
    #[argh(option)]
    if_match: Option<String>,
    /// ETags the resource must not have, comma-separated and quoted, or '*'
    #[argh(option)]
    if_none_match: Option<String>,
    /// HTTP-date; reads are answered "not modified" unless the resource changed after it
    #[argh(option)]
    if_modified_since: Option<String>,
    /// HTTP-date; the request fails if the resource changed after it
    #[argh(option)]
    if_unmodified_since: Option<String>,
    /// file holding the PUT or PATCH payload, or '-' for stdin
    #[argh(option)]
    input: Option<PathBuf>,
    /// content type of the payload
    #[argh(option)]
    content_type: Option<String>,
    /// print a found resource as a multipart body
    #[argh(switch)]
    multipart: bool,
}

/// Lists every AU configuration
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "list-au-configs")]
struct ListAuConfigsArgs {}

/// Loads the configuration file, then applies command-line overrides.  A missing default
/// configuration file is fine as long as --datastore-path is given.
fn load_config(args: &Args) -> Result<ServiceConfig> {
    let (path, explicit) = match &args.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };

    let mut config = if explicit || path.exists() {
        ServiceConfig::from_path(&path).context(error::ConfigSnafu)?
    } else {
        let datastore_path = args
            .datastore_path
            .as_ref()
            .context(error::NoDatastorePathSnafu { path: &path })?;
        ServiceConfig::with_datastore_path(datastore_path)
    };

    if let Some(datastore_path) = &args.datastore_path {
        config.datastore_path = datastore_path.clone();
    }
    Ok(config)
}

fn setup_logger(args: &Args, config: &ServiceConfig) -> Result<()> {
    let log_level = match (args.log_level, &config.log_level) {
        (Some(level), _) => level,
        (None, Some(level)) => {
            LevelFilter::from_str(level).map_err(|_| error::Error::LogLevel {
                given: level.clone(),
            })?
        }
        (None, None) => LevelFilter::Info,
    };
    // Payloads go to stdout, so keep all logging on stderr.
    TermLogger::init(
        log_level,
        LogConfig::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .context(error::LoggerSnafu)
}

/// Builds the headers a client would have sent, so they're parsed exactly as they would be
/// coming off the wire.
fn request_headers(args: &RequestArgs) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let given = [
        (IF_MATCH, &args.if_match),
        (IF_NONE_MATCH, &args.if_none_match),
        (IF_MODIFIED_SINCE, &args.if_modified_since),
        (IF_UNMODIFIED_SINCE, &args.if_unmodified_since),
    ];
    for (name, value) in given {
        if let Some(value) = value {
            let header_value =
                HeaderValue::from_str(value).context(error::HeaderSnafu { name: name.as_str() })?;
            headers.insert(name, header_value);
        }
    }
    Ok(headers)
}

fn read_input(path: &Path) -> Result<Bytes> {
    let mut body = Vec::new();
    if path == Path::new("-") {
        io::stdin()
            .read_to_end(&mut body)
            .context(error::ReadInputSnafu { path })?;
    } else {
        body = fs::read(path).context(error::ReadInputSnafu { path })?;
    }
    Ok(body.into())
}

fn build_request(args: &RequestArgs) -> Result<Request> {
    let headers = request_headers(args)?;
    let preconditions = Preconditions::from_headers(&headers).context(error::ServiceSnafu)?;

    let mut request = Request::new(args.method, &args.name).with_preconditions(preconditions);
    if let Some(input) = &args.input {
        let mut payload = Payload::new(read_input(input)?);
        if let Some(content_type) = &args.content_type {
            payload = payload.with_content_type(content_type);
        }
        request = request.with_payload(payload);
    }
    Ok(request)
}

fn print_headers<W: Write>(out: &mut W, headers: &HeaderMap) -> Result<()> {
    // Print in a stable order.
    let mut names: Vec<&HeaderName> = headers.keys().collect();
    names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    for name in names {
        for value in headers.get_all(name) {
            writeln!(out, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))
                .context(error::OutputSnafu)?;
        }
    }
    Ok(())
}

fn print_envelope<W: Write>(out: &mut W, envelope: &Envelope, multipart: bool) -> Result<()> {
    let body = if multipart {
        let boundary = random_boundary();
        let mut headers = match envelope.stamp() {
            Some(stamp) => stamp_headers(stamp).context(error::ServiceSnafu)?,
            None => HeaderMap::new(),
        };
        let content_type = HeaderValue::from_str(&multipart_content_type(&boundary)).context(
            error::HeaderSnafu {
                name: CONTENT_TYPE.as_str(),
            },
        )?;
        headers.insert(CONTENT_TYPE, content_type);
        print_headers(out, &headers)?;
        envelope.to_multipart(&boundary)
    } else {
        print_headers(out, &envelope.headers().context(error::ServiceSnafu)?)?;
        envelope.payload().clone()
    };
    writeln!(out).context(error::OutputSnafu)?;
    out.write_all(&body).context(error::OutputSnafu)?;
    out.flush().context(error::OutputSnafu)
}

fn print_outcome<W: Write>(out: &mut W, outcome: &Outcome, multipart: bool) -> Result<()> {
    match outcome {
        Outcome::Found(envelope) => print_envelope(out, envelope, multipart),
        Outcome::NotModified(stamp) => {
            writeln!(out, "Not modified").context(error::OutputSnafu)?;
            print_headers(out, &stamp_headers(stamp).context(error::ServiceSnafu)?)
        }
        Outcome::Stored { stamp, created } => {
            let verb = if *created { "Created" } else { "Stored" };
            writeln!(out, "{}", verb).context(error::OutputSnafu)?;
            print_headers(out, &stamp_headers(stamp).context(error::ServiceSnafu)?)
        }
        Outcome::Deleted { existed } => {
            let msg = if *existed { "Deleted" } else { "Nothing to delete" };
            writeln!(out, "{}", msg).context(error::OutputSnafu)
        }
    }
}

fn run() -> Result<()> {
    let args: Args = argh::from_env();
    let config = load_config(&args)?;
    setup_logger(&args, &config)?;

    info!("Using resource store at {}", config.datastore_path.display());
    let store = FilesystemResourceStore::new(&config.datastore_path);
    let service = ResourceService::new(store, Box::new(V3IdentityResolver), &config);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match &args.subcommand {
        Subcommand::Request(request_args) => {
            let request = build_request(request_args)?;
            let outcome = service
                .handle_named(request_args.kind, request)
                .context(error::ServiceSnafu)?;
            print_outcome(&mut out, &outcome, request_args.multipart)
        }
        Subcommand::ListAuConfigs(_) => {
            let listing = service.list_au_configs().context(error::ServiceSnafu)?;
            print_envelope(&mut out, &listing, false)
        }
    }
}

// Returning a Result from main makes it print a Debug representation of the error, but with Snafu
// we have nice Display representations of the error, so we wrap "main" (run) and print any error.
// https://github.com/shepmaster/snafu/issues/110
fn main() {
    if let Err(e) = run() {
        eprintln!("{}", e);
        process::exit(1);
    }
}

mod error {
    use snafu::Snafu;
    use std::io;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(super) enum Error {
        #[snafu(display("{}", source))]
        Config { source: configserver::config::Error },

        #[snafu(display(
            "No configuration file at '{}'; give one with --config or pass --datastore-path",
            path.display()
        ))]
        NoDatastorePath { path: PathBuf },

        #[snafu(display("Invalid log level '{}'", given))]
        LogLevel { given: String },

        #[snafu(display("Logger setup error: {}", source))]
        Logger { source: log::SetLoggerError },

        #[snafu(display("Invalid {} value: {}", name, source))]
        Header {
            name: String,
            source: http::header::InvalidHeaderValue,
        },

        #[snafu(display("Failed to read input from '{}': {}", path.display(), source))]
        ReadInput { path: PathBuf, source: io::Error },

        #[snafu(display("{} ({})", source, source.status_code()))]
        Service { source: configserver::Error },

        #[snafu(display("Failed to write output: {}", source))]
        Output { source: io::Error },
    }
}
