use clap::Parser;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use heapql::{
    execute_query, parse_query, union, MemorySnapshot, MethodPolicy, NoProgress, ObjectId, Query,
    QueryOutcome, Session, Snapshot, SnapshotBuilder, Value,
};

mod cli;

/// Parse a query provided as either a literal string or a path to a file on
/// disk
fn make_query(
    query_string: &Option<String>,
    query_path: &Option<PathBuf>,
) -> anyhow::Result<Query> {
    match query_string {
        Some(s) => parse_query(s),
        None => match query_path {
            Some(p) => {
                let s = std::fs::read_to_string(p)?;
                parse_query(s.trim())
            }
            None => {
                anyhow::bail!("either a literal query or --query-path is required")
            }
        },
    }
}

/// Load a snapshot from its JSON description.
///
/// Classes are declared first (supers must precede their subclasses) and
/// objects after; object-valued fields use `{"ref": N}` where N is the
/// zero-based position of the target in the objects array.
fn load_snapshot(path: &Path) -> anyhow::Result<MemorySnapshot> {
    let text = std::fs::read_to_string(path)?;
    let doc: serde_json::Value = serde_json::from_str(&text)?;
    let mut builder = SnapshotBuilder::new();

    let mut class_ids: std::collections::HashMap<String, ObjectId> =
        std::collections::HashMap::new();
    for class in doc["classes"].as_array().into_iter().flatten() {
        let name = class["name"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("class without a name"))?;
        let super_class = match class["super"].as_str() {
            Some(s) => Some(
                *class_ids
                    .get(s)
                    .ok_or_else(|| anyhow::anyhow!("superclass `{s}` not declared before `{name}`"))?,
            ),
            None => None,
        };
        let interfaces: Vec<&str> = class["interfaces"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str())
            .collect();
        let fields: Vec<&str> = class["fields"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str())
            .collect();
        let id = builder.add_class(name, super_class, &interfaces, &fields);
        class_ids.insert(name.to_string(), id);
    }

    let empty = Vec::new();
    let object_docs = doc["objects"].as_array().unwrap_or(&empty);
    let mut object_ids = Vec::with_capacity(object_docs.len());
    for obj in object_docs {
        let class_name = obj["class"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("object without a class"))?;
        let class_id = *class_ids
            .get(class_name)
            .ok_or_else(|| anyhow::anyhow!("undeclared class `{class_name}`"))?;
        object_ids.push(builder.add_object(class_id));
    }

    // Second pass now that every object has an id, so refs can point anywhere
    for (i, obj) in object_docs.iter().enumerate() {
        let id = object_ids[i];
        if let Some(fields) = obj["fields"].as_object() {
            for (name, v) in fields {
                builder.set_field(id, name, json_to_value(v, &object_ids)?);
            }
        }
        if let Some(elements) = obj["array"].as_array() {
            let mut out = Vec::with_capacity(elements.len());
            for e in elements {
                out.push(json_to_value(e, &object_ids)?);
            }
            builder.set_array(id, out);
        }
        if let Some(display) = obj["display"].as_str() {
            builder.set_display_name(id, display);
        }
        let used = obj["used"].as_i64().unwrap_or(0);
        let retained = obj["retained"].as_i64().unwrap_or(used);
        if used != 0 || retained != 0 {
            builder.set_sizes(id, used, retained);
        }
        if let Some(out) = obj["outbound"].as_array() {
            let targets = resolve_refs(out, &object_ids)?;
            builder.set_outbound(id, targets);
        }
        if let Some(d) = obj["dominator"].as_u64() {
            let dominator = *object_ids
                .get(d as usize)
                .ok_or_else(|| anyhow::anyhow!("dominator index {d} out of range"))?;
            builder.set_dominator(id, dominator);
        }
        if let Some(entries) = obj["entries"].as_array() {
            let resolved = resolve_refs(entries, &object_ids)?;
            let size = obj["size"].as_u64().map(|s| s as usize).unwrap_or(resolved.len());
            builder.set_entries(id, resolved, size);
        }
    }

    Ok(builder.build())
}

fn resolve_refs(
    indices: &[serde_json::Value],
    object_ids: &[ObjectId],
) -> anyhow::Result<Vec<ObjectId>> {
    let mut out = Vec::with_capacity(indices.len());
    for v in indices {
        let i = v
            .as_u64()
            .ok_or_else(|| anyhow::anyhow!("object reference must be an index"))?;
        out.push(
            *object_ids
                .get(i as usize)
                .ok_or_else(|| anyhow::anyhow!("object index {i} out of range"))?,
        );
    }
    Ok(out)
}

fn json_to_value(v: &serde_json::Value, object_ids: &[ObjectId]) -> anyhow::Result<Value> {
    match v {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if let Ok(small) = i32::try_from(i) {
                    Ok(Value::Int(small))
                } else {
                    Ok(Value::Long(i))
                }
            } else {
                Ok(Value::Double(n.as_f64().unwrap_or(0.0)))
            }
        }
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
        serde_json::Value::Object(map) => {
            let i = map
                .get("ref")
                .and_then(|r| r.as_u64())
                .ok_or_else(|| anyhow::anyhow!("object fields must be scalars or {{\"ref\": N}}"))?;
            Ok(Value::Object(
                *object_ids
                    .get(i as usize)
                    .ok_or_else(|| anyhow::anyhow!("object index {i} out of range"))?,
            ))
        }
        serde_json::Value::Array(_) => {
            anyhow::bail!("nested arrays are not supported in field values")
        }
    }
}

fn value_to_json(v: &Value, snapshot: &dyn Snapshot) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::json!(b),
        Value::Byte(n) => serde_json::json!(n),
        Value::Short(n) => serde_json::json!(n),
        Value::Char(c) => serde_json::json!(c.to_string()),
        Value::Int(n) => serde_json::json!(n),
        Value::Long(n) => serde_json::json!(n),
        Value::Float(x) => serde_json::json!(x),
        Value::Double(x) => serde_json::json!(x),
        Value::String(s) => serde_json::json!(s),
        Value::List(items) => serde_json::Value::Array(
            items.iter().map(|i| value_to_json(i, snapshot)).collect(),
        ),
        Value::Row(cols) => serde_json::Value::Object(
            cols.iter()
                .map(|(name, v)| (name.clone(), value_to_json(v, snapshot)))
                .collect(),
        ),
        Value::Object(id) => serde_json::json!({
            "objectId": id,
            "displayName": snapshot.display_name(*id).unwrap_or_default(),
        }),
        Value::Ids(ids) => serde_json::Value::Array(ids.iter().map(|id| serde_json::json!(id)).collect()),
        Value::Table(t) => serde_json::json!({
            "columns": t.columns,
            "rows": t
                .rows
                .iter()
                .map(|row| row.iter().map(|v| value_to_json(v, snapshot)).collect::<Vec<_>>())
                .collect::<Vec<_>>(),
        }),
    }
}

/// Results go to standard out rather than the logs, as logs should be able to
/// be redirected separately.
fn print_outcome(outcome: &QueryOutcome, snapshot: &dyn Snapshot, as_json: bool) {
    if as_json {
        let doc = match outcome {
            QueryOutcome::Objects(ids) => serde_json::json!({
                "objects": ids
                    .iter()
                    .map(|id| value_to_json(&Value::Object(*id), snapshot))
                    .collect::<Vec<_>>(),
            }),
            QueryOutcome::Table(t) => value_to_json(&Value::Table(t.clone()), snapshot),
            QueryOutcome::Values(vs) => serde_json::Value::Array(
                vs.iter().map(|v| value_to_json(v, snapshot)).collect(),
            ),
        };
        println!("{doc:#}");
        return;
    }
    match outcome {
        QueryOutcome::Objects(ids) => {
            for id in ids {
                let name = snapshot
                    .display_name(*id)
                    .unwrap_or_else(|_| "<unknown>".to_string());
                println!("#{id} {name}");
            }
            println!("{} objects", ids.len());
        }
        QueryOutcome::Table(t) => {
            println!("{}", t.columns.join(" | "));
            for row in &t.rows {
                let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                println!("{}", cells.join(" | "));
            }
            println!("{} rows", t.rows.len());
        }
        QueryOutcome::Values(vs) => {
            for v in vs {
                println!("{v}");
            }
            println!("{} values", vs.len());
        }
    }
}

fn merge_batch(path: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)?;
    let mut batch = String::new();
    for line in text.lines() {
        let line = line.trim();
        if !line.is_empty() {
            union(&mut batch, line);
        }
    }
    println!("{batch}");
    Ok(())
}

fn initialize_logging(log_file_path: &Option<PathBuf>) -> anyhow::Result<()> {
    let subscriber_builder = FmtSubscriber::builder().with_max_level(Level::DEBUG);
    match log_file_path {
        None => {
            let subscriber = subscriber_builder.with_writer(std::io::stderr).finish();
            tracing::subscriber::set_global_default(subscriber)
                .expect("setting default subscriber failed");
        }
        Some(p) => {
            let f = File::create(p)?;
            let subscriber = subscriber_builder.with_writer(Mutex::new(f)).finish();
            tracing::subscriber::set_global_default(subscriber)
                .expect("setting default subscriber failed");
        }
    };
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    initialize_logging(&args.log_file)?;

    if let Some(path) = &args.merge_batch {
        return merge_batch(path);
    }

    let query = make_query(&args.query_string, &args.query_path)?;

    if args.ast {
        println!("{query:#?}");
        return Ok(());
    }

    let snapshot_path = args
        .snapshot
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("--snapshot is required to run a query"))?;
    let snapshot = load_snapshot(snapshot_path)?;

    let session = match &args.method_filter {
        Some(f) => Session::with_policy(MethodPolicy::parse(f)),
        None => Session::new(),
    };

    info!("running: {}", query);
    let outcome = execute_query(&query, &snapshot, &NoProgress, &session)?;
    print_outcome(&outcome, &snapshot, args.json);

    Ok(())
}
