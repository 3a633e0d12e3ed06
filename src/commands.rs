//! Command execution.

use crate::{Commands, Target};
use colored::Colorize;
use crdtkv_client::{
    Client, CrdtOperation, CrdtType, FetchOptions, Loaded, OperationValue, SetDelta,
    UpdateOptions, UpdateResponse,
};

/// Executes a command and returns the formatted output.
pub fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl => Ok("Already in the REPL".yellow().to_string()),

        Commands::Ping => {
            client.ping()?;
            Ok("PONG".green().to_string())
        }

        Commands::Info => {
            let info = client.server_info()?;
            Ok(format!(
                "  Node: {}\n  Version: {}",
                info.node.as_deref().unwrap_or("?").cyan(),
                info.server_version.as_deref().unwrap_or("?")
            ))
        }

        Commands::Fetch { target, r, pr } => {
            let options = FetchOptions {
                r,
                pr,
                ..Default::default()
            };
            let loaded = client.fetch(&target.location(), &options)?;
            format_loaded(&target, &loaded)
        }

        Commands::Incr { target, delta } => update(
            client,
            &target,
            vec![CrdtOperation::increment(delta)],
            false,
        ),

        Commands::SetAdd { target, items } => update(
            client,
            &target,
            vec![CrdtOperation::set(SetDelta::new().add_all(items))],
            false,
        ),

        Commands::SetRemove { target, items } => update(
            client,
            &target,
            vec![CrdtOperation::set(SetDelta::new().remove_all(items))],
            true,
        ),

        Commands::HllAdd { target, items } => {
            update(client, &target, vec![CrdtOperation::hll_add(items)], false)
        }

        Commands::MapIncr {
            target,
            path,
            delta,
        } => update(client, &target, vec![map_update(&path, delta)?], false),

        Commands::MapRegister {
            target,
            path,
            value,
        } => update(client, &target, vec![map_update(&path, value)?], false),

        Commands::MapFlag {
            target,
            path,
            value,
        } => update(client, &target, vec![map_update(&path, value)?], false),

        Commands::MapSetAdd {
            target,
            path,
            items,
        } => update(
            client,
            &target,
            vec![map_update(&path, SetDelta::new().add_all(items))?],
            false,
        ),

        Commands::MapRemove { target, path, kind } => update(
            client,
            &target,
            vec![map_remove(&path, kind.into())?],
            true,
        ),
    }
}

/// Sends an update, fetching the current context first when it removes anything.
fn update(
    client: &Client,
    target: &Target,
    ops: Vec<CrdtOperation>,
    needs_context: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    let location = target.location();
    let mut options = UpdateOptions::default();
    if needs_context {
        let current = client.fetch(&location, &FetchOptions::default())?;
        if current.context.is_none() {
            return Ok(format!("{}: {} does not exist", "Warning".yellow(), location));
        }
        options = options.with_context(current.context);
    }

    let resp = client.update(&location, &ops, &options)?;
    format_update(target, &resp)
}

/// Builds a root map operation that applies `value` at a dotted field path.
pub fn map_update(
    path: &str,
    value: impl Into<OperationValue>,
) -> Result<CrdtOperation, Box<dyn std::error::Error>> {
    let (parents, field) = split_path(path)?;
    Ok(nest(parents, CrdtOperation::update_field(field, value)))
}

/// Builds a root map operation that removes the field at a dotted path.
pub fn map_remove(path: &str, kind: CrdtType) -> Result<CrdtOperation, Box<dyn std::error::Error>> {
    let (parents, field) = split_path(path)?;
    Ok(nest(parents, CrdtOperation::delete_field(field, kind)))
}

fn split_path(path: &str) -> Result<(Vec<&str>, &str), Box<dyn std::error::Error>> {
    let mut segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(format!("invalid field path '{}'", path).into());
    }
    let field = segments.pop().ok_or("empty field path")?;
    Ok((segments, field))
}

fn nest(parents: Vec<&str>, innermost: CrdtOperation) -> CrdtOperation {
    let op = parents
        .into_iter()
        .rev()
        .fold(innermost, |inner, parent| {
            CrdtOperation::update_field(parent, vec![inner])
        });
    CrdtOperation::map(vec![op])
}

fn format_loaded(target: &Target, loaded: &Loaded) -> Result<String, Box<dyn std::error::Error>> {
    let mut output = format!(
        "{} {}/{}/{} ({})\n",
        "Value".bold(),
        target.bucket_type,
        target.bucket,
        target.key.cyan(),
        loaded.value.crdt_type()
    );
    output.push_str(&serde_json::to_string_pretty(&loaded.value)?);
    match loaded.context {
        Some(ref context) => {
            output.push_str(&format!("\n{}: {} bytes", "Context".dimmed(), context.len()))
        }
        None => output.push_str(&format!("\n{}", "Not found".yellow())),
    }
    Ok(output)
}

fn format_update(
    target: &Target,
    resp: &UpdateResponse,
) -> Result<String, Box<dyn std::error::Error>> {
    let key = resp.key.as_deref().unwrap_or(&target.key);
    let mut output = format!(
        "{} {}/{}/{}",
        "Updated".green(),
        target.bucket_type,
        target.bucket,
        key.cyan()
    );
    if let Some(ref value) = resp.value {
        output.push('\n');
        output.push_str(&serde_json::to_string_pretty(value)?);
    }
    Ok(output)
}
