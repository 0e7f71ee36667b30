//! Command execution and result formatting.

use crate::config::Config;
use crate::{Commands, ValueKind};
use colored::Colorize;
use rserve_client::{Client, ClientError, Session};
use rserve_protocol::{Rexp, Sexp, SexpKind};
use serde_json::{json, Map, Value};
use std::io::Write;

/// R's integer NA.
const NA_INTEGER: i32 = i32::MIN;

/// Bit pattern of R's double NA.
const NA_REAL_BITS: u64 = 0x7ff0_0000_0000_07a2;

/// Bytes requested per `readFile` call.
const READ_CHUNK: usize = 64 * 1024;

/// Bytes sent per `writeFile` call.
const WRITE_CHUNK: usize = 1024 * 1024;

/// Connects and logs in with the configured credentials.
pub fn connect(config: &Config) -> Result<Client, ClientError> {
    let mut client = Client::new(config.connection_config());
    client.connect()?;
    match config.credentials() {
        Some((user, password)) => client.login(user, password)?,
        None if client.connection().auth().required() => {
            tracing::warn!("server requires a login but no user is configured");
        }
        None => {}
    }
    Ok(client)
}

/// Executes a command and returns the formatted output.
pub fn execute(
    client: &mut Client,
    cmd: Commands,
    json: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl | Commands::Resume { .. } => unreachable!(),

        Commands::Eval { expr } => {
            let value = client.eval(&expr)?;
            Ok(format_rexp(&value, json))
        }

        Commands::VoidEval { expr } => {
            client.void_eval(&expr)?;
            Ok(String::new())
        }

        Commands::Assign { name, kind, values } => {
            let value = parse_values(kind, &values)?;
            client.assign(&name, &value)?;
            Ok(format!("{} {} ({} values)", "Assigned".green(), name.cyan(), values.len()))
        }

        Commands::Detach { expr, output } => {
            let session = client.detached_eval(expr.as_deref())?;
            let text = format_session(&session, json)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &text)?;
                    Ok(format!(
                        "{} session, resume on port {} (saved to {})",
                        "Detached".green(),
                        session.port,
                        path.display()
                    ))
                }
                None => Ok(text),
            }
        }

        Commands::ReadFile { remote, local } => {
            let data = read_remote_file(client, &remote)?;
            match local {
                Some(path) => {
                    std::fs::write(&path, &data)?;
                    Ok(format!(
                        "{} {} bytes to {}",
                        "Wrote".green(),
                        data.len(),
                        path.display()
                    ))
                }
                None => {
                    std::io::stdout().write_all(&data)?;
                    Ok(String::new())
                }
            }
        }

        Commands::WriteFile { local, remote } => {
            let data = std::fs::read(&local)?;
            client.create_file(&remote)?;
            for chunk in data.chunks(WRITE_CHUNK) {
                client.write_file(chunk)?;
            }
            client.close_file()?;
            Ok(format!(
                "{} {} bytes to {}",
                "Uploaded".green(),
                data.len(),
                remote.cyan()
            ))
        }

        Commands::RemoveFile { remote } => {
            client.remove_file(&remote)?;
            Ok(format!("{} {}", "Removed".green(), remote.cyan()))
        }

        Commands::Shutdown { key, control } => {
            if control {
                client.server_shutdown()?;
            } else {
                client.shutdown(key.as_deref())?;
            }
            Ok("Server shutting down".yellow().to_string())
        }

        Commands::Status => {
            let ok = client.query_custom_status()?;
            if json {
                return Ok(json!({ "ok": ok }).to_string());
            }
            Ok(if ok {
                "OK".green().to_string()
            } else {
                "NOT OK".red().to_string()
            })
        }
    }
}

/// Resumes a detached session saved by `detach` and optionally evaluates
/// `expr` in it.
pub fn resume(
    config: &Config,
    session: &Session,
    expr: Option<&str>,
    json: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    let mut client = Client::resume_with_config(config.connection_config(), session);
    client.connect()?;
    let output = match expr {
        Some(expr) => format_rexp(&client.eval(expr)?, json),
        None => format!("{} session on port {}", "Resumed".green(), session.port),
    };
    client.disconnect();
    Ok(output)
}

/// Reads a whole file from the server.
pub fn read_remote_file(client: &mut Client, name: &str) -> Result<Vec<u8>, ClientError> {
    client.open_file(name)?;
    let mut data = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = client.read_file(&mut chunk)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..n]);
    }
    client.close_file()?;
    Ok(data)
}

/// Session as YAML, or as JSON with `json`.
pub fn format_session(session: &Session, json: bool) -> Result<String, Box<dyn std::error::Error>> {
    if json {
        Ok(serde_json::to_string_pretty(session)?)
    } else {
        Ok(serde_yaml::to_string(session)?)
    }
}

/// Builds a vector from command-line values. "NA" denotes a missing value.
pub fn parse_values(kind: ValueKind, values: &[String]) -> Result<Rexp, Box<dyn std::error::Error>> {
    let value = match kind {
        ValueKind::Int => {
            let ints = values
                .iter()
                .map(|v| if v == "NA" { Ok(NA_INTEGER) } else { v.parse() })
                .collect::<Result<Vec<i32>, _>>()?;
            Rexp::integers(&ints)
        }
        ValueKind::Double => {
            let doubles = values
                .iter()
                .map(|v| {
                    if v == "NA" {
                        Ok(f64::from_bits(NA_REAL_BITS))
                    } else {
                        v.parse()
                    }
                })
                .collect::<Result<Vec<f64>, _>>()?;
            Rexp::doubles(&doubles)
        }
        ValueKind::String => {
            let strings: Vec<Option<&str>> = values
                .iter()
                .map(|v| (v != "NA").then_some(v.as_str()))
                .collect();
            Rexp::strings_with_na(&strings)
        }
    };
    Ok(value)
}

// =========================================================================
// Formatting
// =========================================================================

/// Renders a result as pretty JSON or as R-like text.
pub fn format_rexp(value: &Rexp, json: bool) -> String {
    let root = value.root();
    if json {
        let value = sexp_to_json(root);
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
    } else {
        format_text(root)
    }
}

/// Names from the `names` attribute.
fn names(sexp: Sexp<'_>) -> Option<Vec<String>> {
    let attr = sexp.attribute("names")?;
    match attr.kind() {
        SexpKind::StringArray => Some(
            attr.strings()
                .into_iter()
                .map(|s| s.unwrap_or("NA").to_string())
                .collect(),
        ),
        SexpKind::Vector => Some(
            attr.children()
                .map(|c| c.as_str().unwrap_or("").to_string())
                .collect(),
        ),
        SexpKind::String => attr.as_str().map(|s| vec![s.to_string()]),
        _ => None,
    }
}

fn tag_name(tag: Option<Sexp<'_>>) -> Option<String> {
    let tag = tag?;
    tag.symbol_name().or_else(|| tag.as_str()).map(str::to_string)
}

fn is_na_real(value: f64) -> bool {
    value.is_nan() && (value.to_bits() & 0xffff_ffff) == (NA_REAL_BITS & 0xffff_ffff)
}

/// Converts a SEXP to JSON. Atomic vectors become arrays (NA as null);
/// anything carrying names becomes an object.
pub fn sexp_to_json(sexp: Sexp<'_>) -> Value {
    let items: Vec<Value> = match sexp.kind() {
        SexpKind::Null => return Value::Null,
        SexpKind::Symbol => return json!({ "symbol": sexp.symbol_name() }),
        SexpKind::String => return json!(sexp.as_str()),
        SexpKind::Unknown(type_code) => {
            return json!({ "type": type_code, "bytes": sexp.byte_len() })
        }
        SexpKind::Integer => sexp
            .integers()
            .unwrap_or_default()
            .into_iter()
            .map(|v| if v == NA_INTEGER { Value::Null } else { json!(v) })
            .collect(),
        SexpKind::Double => sexp
            .doubles()
            .unwrap_or_default()
            .into_iter()
            .map(|v| serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number))
            .collect(),
        SexpKind::StringArray => sexp.strings().into_iter().map(|s| json!(s)).collect(),
        SexpKind::Vector => sexp.children().map(sexp_to_json).collect(),
        SexpKind::List(_) => {
            let entries: Vec<(Option<String>, Value)> = sexp
                .entries()
                .map(|(value, tag)| (tag_name(tag), sexp_to_json(value)))
                .collect();
            if !entries.is_empty() && entries.iter().all(|(tag, _)| tag.is_some()) {
                let mut map = Map::new();
                for (tag, value) in entries {
                    map.insert(tag.unwrap_or_default(), value);
                }
                return Value::Object(map);
            }
            entries.into_iter().map(|(_, value)| value).collect()
        }
    };

    match names(sexp) {
        Some(names) if names.len() == items.len() => {
            Value::Object(names.into_iter().zip(items).collect())
        }
        _ => Value::Array(items),
    }
}

fn format_double(value: f64) -> String {
    if is_na_real(value) {
        "NA".to_string()
    } else if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

/// R-like text rendering.
pub fn format_text(sexp: Sexp<'_>) -> String {
    let atoms: Vec<String> = match sexp.kind() {
        SexpKind::Null => return "NULL".to_string(),
        SexpKind::Symbol => return format!("`{}`", sexp.symbol_name().unwrap_or("")),
        SexpKind::String => return format!("{:?}", sexp.as_str().unwrap_or("")),
        SexpKind::Unknown(_) => return sexp.to_string(),
        SexpKind::Vector => {
            let names = names(sexp);
            return format_elements(
                sexp.children()
                    .enumerate()
                    .map(|(i, child)| {
                        let label = names.as_ref().and_then(|n| n.get(i).cloned());
                        (label, child)
                    })
                    .collect(),
            );
        }
        SexpKind::List(_) => {
            return format_elements(
                sexp.entries()
                    .map(|(value, tag)| (tag_name(tag), value))
                    .collect(),
            );
        }
        SexpKind::Integer => sexp
            .integers()
            .unwrap_or_default()
            .into_iter()
            .map(|v| if v == NA_INTEGER { "NA".to_string() } else { v.to_string() })
            .collect(),
        SexpKind::Double => sexp
            .doubles()
            .unwrap_or_default()
            .into_iter()
            .map(format_double)
            .collect(),
        SexpKind::StringArray => sexp
            .strings()
            .into_iter()
            .map(|s| s.map_or_else(|| "NA".to_string(), |s| format!("{:?}", s)))
            .collect(),
    };

    if atoms.is_empty() {
        return match sexp.kind() {
            SexpKind::Integer => "integer(0)",
            SexpKind::Double => "numeric(0)",
            _ => "character(0)",
        }
        .to_string();
    }
    match names(sexp) {
        Some(names) if names.len() == atoms.len() => names
            .iter()
            .zip(&atoms)
            .map(|(name, atom)| format!("{} = {}", name, atom))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => format!("[1] {}", atoms.join(" ")),
    }
}

fn format_elements(elements: Vec<(Option<String>, Sexp<'_>)>) -> String {
    if elements.is_empty() {
        return "list()".to_string();
    }
    elements
        .into_iter()
        .enumerate()
        .map(|(i, (label, value))| {
            let header = match label {
                Some(name) if !name.is_empty() => format!("${}", name),
                _ => format!("[[{}]]", i + 1),
            };
            format!("{}\n{}", header, format_text(value))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
