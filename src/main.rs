use anyhow::{Context, Result, anyhow};
use autumnus::{FormatterOption, Options, highlight, themes};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::{ArgValueCompleter, CompletionCandidate};
use iocraft::prelude::*;
use std::{collections::HashMap, fs, path::PathBuf};
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

use strato::{
    CreateScriptParams, Placement, PlacementMode, ScriptBinding, ScriptSource, StratoClient,
    TailConsumer,
};

use crate::ui::{ErrorMessage, ScriptList, SuccessMessage};

mod config;
mod ui;

#[derive(Parser)]
#[command(name = "strato")]
#[command(version)]
#[command(about = "A tool for deploying scripts to the Strato edge compute platform")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct UploadArgs {
    /// Script name
    #[arg(add = ArgValueCompleter::new(script_name_completer))]
    name: String,
    /// Path to the script source
    #[arg(value_hint = ValueHint::FilePath)]
    file: PathBuf,
    /// Upload the script as an ES module
    #[arg(short, long)]
    module: bool,
    /// Upload into a dispatch namespace
    #[arg(long)]
    namespace: Option<String>,
    /// Runtime compatibility date (yyyy-mm-dd)
    #[arg(long)]
    compatibility_date: Option<String>,
    /// Runtime compatibility flags
    #[arg(long = "compatibility-flag")]
    compatibility_flags: Vec<String>,
    /// Opt the script in or out of log forwarding
    #[arg(long)]
    logpush: Option<bool>,
    /// Key-value namespace binding, NAME=NAMESPACE_ID
    #[arg(long = "kv")]
    kv: Vec<String>,
    /// Plain text binding, NAME=VALUE
    #[arg(long = "plain-text")]
    plain_text: Vec<String>,
    /// Secret text binding, NAME=VALUE
    #[arg(long = "secret")]
    secrets: Vec<String>,
    /// Wasm module binding, NAME=PATH
    #[arg(long = "wasm")]
    wasm: Vec<String>,
    /// Scripts that consume this script's logs
    #[arg(long = "tail-consumer")]
    tail_consumers: Vec<String>,
    /// Run the script with smart placement
    #[arg(long)]
    smart_placement: bool,
    /// Tags for bulk management
    #[arg(long = "tag")]
    tags: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a script with its bindings and metadata
    Upload {
        #[arg(short, long)]
        account: Option<String>,
        #[command(flatten)]
        args: UploadArgs,
    },
    /// Fetch a script back, decoded from its download shape
    Get {
        #[arg(short, long)]
        account: Option<String>,
        #[arg(add = ArgValueCompleter::new(script_name_completer))]
        name: String,
    },
    /// Print a script's raw content
    Content {
        #[arg(short, long)]
        account: Option<String>,
        #[arg(add = ArgValueCompleter::new(script_name_completer))]
        name: String,
    },
    /// List the scripts in an account
    List {
        #[arg(short, long)]
        account: Option<String>,
    },
    /// Delete a script
    Delete {
        #[arg(short, long)]
        account: Option<String>,
        #[arg(add = ArgValueCompleter::new(script_name_completer))]
        name: String,
    },
    /// Show a script's settings
    Settings {
        #[arg(short, long)]
        account: Option<String>,
        #[arg(add = ArgValueCompleter::new(script_name_completer))]
        name: String,
    },
    /// Store your API key in the OS keyring
    SetApiKey { api_key: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let _rt_guard = rt.enter();
    clap_complete::CompleteEnv::with_factory(Cli::command).complete();
    let cli = Cli::parse();

    rt.block_on(async {
        match cli.command {
            Commands::SetApiKey { api_key } => config::set_api_key_keyring(api_key),
            requires_api_key => {
                let config = config::read_config()?;
                let client = StratoClient::new(config.strato_base_url, config.strato_api_key);
                let default_account = config.default_account.clone();

                let load_account = |maybe_account: Option<String>| {
                    maybe_account.or(default_account.clone()).expect(
                        "An account must be specified via the --account argument or a default account configured"
                    )
                };

                match requires_api_key {
                    Commands::Upload { account, args } => {
                        upload_script(&client, &load_account(account), args).await
                    }
                    Commands::Get { account, name } => {
                        get_script(&client, &load_account(account), &name).await
                    }
                    Commands::Content { account, name } => {
                        get_content(&client, &load_account(account), &name).await
                    }
                    Commands::List { account } => {
                        list_scripts(&client, &load_account(account)).await
                    }
                    Commands::Delete { account, name } => {
                        delete_script(&client, &load_account(account), &name).await
                    }
                    Commands::Settings { account, name } => {
                        show_settings(&client, &load_account(account), &name).await
                    }
                    Commands::SetApiKey { api_key: _ } => {
                        panic!("This state should be unreachable")
                    }
                }
            }
        }
    })
}

fn parse_key_value(entry: &str) -> Result<(&str, &str)> {
    entry
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected NAME=VALUE, got '{entry}'"))
}

fn collect_bindings(args: &UploadArgs) -> Result<HashMap<String, ScriptBinding>> {
    let mut bindings = HashMap::new();

    for entry in &args.kv {
        let (name, namespace_id) = parse_key_value(entry)?;
        bindings.insert(
            name.to_owned(),
            ScriptBinding::KvNamespace {
                namespace_id: namespace_id.to_owned(),
            },
        );
    }
    for entry in &args.plain_text {
        let (name, text) = parse_key_value(entry)?;
        bindings.insert(
            name.to_owned(),
            ScriptBinding::PlainText {
                text: text.to_owned(),
            },
        );
    }
    for entry in &args.secrets {
        let (name, text) = parse_key_value(entry)?;
        bindings.insert(
            name.to_owned(),
            ScriptBinding::SecretText {
                text: text.to_owned(),
            },
        );
    }
    for entry in &args.wasm {
        let (name, path) = parse_key_value(entry)?;
        let module =
            fs::read(path).with_context(|| format!("Failed to read wasm module from {path}"))?;
        bindings.insert(name.to_owned(), ScriptBinding::WasmModule { module });
    }

    Ok(bindings)
}

async fn upload_script(client: &StratoClient, account: &str, args: UploadArgs) -> Result<()> {
    let script_text = fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read script from {}", args.file.display()))?;

    let bindings = collect_bindings(&args)?;
    let tail_consumers = if args.tail_consumers.is_empty() {
        None
    } else {
        Some(
            args.tail_consumers
                .iter()
                .map(|service| TailConsumer {
                    service: service.clone(),
                    environment: None,
                    namespace: None,
                })
                .collect(),
        )
    };

    let params = CreateScriptParams {
        script_name: args.name.clone(),
        dispatch_namespace: args.namespace.clone(),
        module: args.module,
        script: Some(ScriptSource::Text(script_text)),
        bindings,
        logpush: args.logpush,
        tail_consumers,
        compatibility_date: args.compatibility_date.clone().unwrap_or_default(),
        compatibility_flags: args.compatibility_flags.clone(),
        placement: args.smart_placement.then_some(Placement {
            mode: PlacementMode::Smart,
        }),
        tags: args.tags.clone(),
    };

    let metadata = client.upload_script(account, params).await?;

    let deployment = metadata.deployment_id.unwrap_or_else(|| "-".to_owned());
    element!(SuccessMessage(
        message: format!("Script {} uploaded (deployment {})", metadata.id, deployment)
    ))
    .print();

    Ok(())
}

async fn get_script(client: &StratoClient, account: &str, name: &str) -> Result<()> {
    let fetched = client.get_script(account, name).await?;
    if fetched.module {
        element!(SuccessMessage(message: format!("{name} is a module script"))).print();
    }
    println!("{}", fetched.script);
    Ok(())
}

async fn get_content(client: &StratoClient, account: &str, name: &str) -> Result<()> {
    let content = client.get_script_content(account, name).await?;
    println!("{content}");
    Ok(())
}

async fn list_scripts(client: &StratoClient, account: &str) -> Result<()> {
    let scripts = client.list_scripts(account).await?;
    element!(ScriptList(scripts: scripts)).print();
    Ok(())
}

async fn delete_script(client: &StratoClient, account: &str, name: &str) -> Result<()> {
    client.delete_script(account, name).await?;
    element!(SuccessMessage(message: format!("Script {name} deleted"))).print();
    Ok(())
}

async fn show_settings(client: &StratoClient, account: &str, name: &str) -> Result<()> {
    let settings = client.get_script_settings(account, name).await?;
    let output = highlight(
        &serde_json::to_string_pretty(&settings)?,
        Options {
            formatter: FormatterOption::Terminal {
                theme: Some(themes::get("ayu_light").expect("Syntax highlighting theme not found")),
            },
            lang_or_file: Some("json"),
        },
    );
    println!("{}", output);

    for descriptor in settings.bindings {
        match descriptor.into_binding() {
            Ok((binding_name, binding)) => println!("  {binding_name}: {}", binding.kind()),
            Err(err) => {
                element!(ErrorMessage(message: format!("{err}"))).print();
            }
        }
    }

    Ok(())
}

fn script_name_completer(current: &std::ffi::OsStr) -> Vec<CompletionCandidate> {
    let mut completions = vec![];
    let Some(current) = current.to_str() else {
        return completions;
    };

    let config = config::read_config().expect("Failed to read config");

    let client = StratoClient::new(config.strato_base_url, config.strato_api_key);

    let handle = Handle::current();
    let scripts = handle
        .block_on(client.list_scripts(&config.default_account.expect("No default account set")))
        .unwrap();

    scripts.into_iter().for_each(|script| {
        if script.id.starts_with(current) {
            completions.push(CompletionCandidate::new(script.id));
        }
    });

    completions
}
