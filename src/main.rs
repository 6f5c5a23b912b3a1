// yavirtctl - Command line client for yavirtd
//
// Thin CLI over the yavirt-client library:
// - guest lifecycle, exec and console attach
// - network, snapshot and image management
// - daemon event subscription

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Args as ClapArgs, Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};
use yavirt_client::config::ClientConfig;
use yavirt_client::types::{
    AttachGuestFlags, CaptureGuestReq, ConnectNetworkReq, CreateGuestReq, DisconnectNetworkReq,
    GetGuestIdListReq, ResizeGuestReq,
};
use yavirt_client::{ByteStream, Client, Content};

/// yavirtctl: control guests on a yavirtd host
#[derive(Parser, Debug)]
#[command(name = "yavirtctl")]
#[command(version)]
#[command(about = "Command line client for the yavirtd VM daemon", long_about = None)]
struct Args {
    /// Daemon URI, e.g. grpc://127.0.0.1:9697 or http://127.0.0.1:9696/v1
    #[arg(long, env = "YAVIRT_URI", global = true)]
    uri: Option<String>,

    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Print client metrics to stderr on exit
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show host resources
    Info,
    /// Manage guests
    #[command(subcommand)]
    Guest(GuestCommands),
    /// Manage guest networking
    #[command(subcommand)]
    Network(NetworkCommands),
    /// Manage volume snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommands),
    /// Manage system images
    #[command(subcommand)]
    Image(ImageCommands),
    /// Stream daemon events
    Events {
        /// Event filter as key=value (repeatable)
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,
    },
}

#[derive(Subcommand, Debug)]
enum GuestCommands {
    /// Show a guest
    Get { id: String },
    /// Show a guest's UUID
    Uuid { id: String },
    /// List guest IDs
    List {
        /// Label filter as key=value (repeatable)
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,
    },
    /// Create a guest
    Create(CreateArgs),
    /// Start a guest
    Start { id: String },
    /// Stop a guest
    Stop {
        id: String,
        #[arg(long)]
        force: bool,
    },
    /// Destroy a guest
    Destroy {
        id: String,
        #[arg(long)]
        force: bool,
    },
    /// Block until a guest stops
    Wait {
        id: String,
        #[arg(long)]
        force: bool,
    },
    /// Change a guest's resources
    Resize {
        id: String,
        #[arg(long, default_value_t = 0)]
        cpu: i64,
        /// Memory in bytes
        #[arg(long, default_value_t = 0)]
        mem: i64,
        /// Volume as mount=size_in_bytes (repeatable)
        #[arg(long = "volume", value_parser = parse_volume)]
        volumes: Vec<(String, i64)>,
    },
    /// Capture a guest's system disk as a user image
    Capture {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        user: String,
        /// Replace an existing image with the same name
        #[arg(long)]
        overridden: bool,
    },
    /// Run a command and print its output
    Exec {
        id: String,
        #[arg(trailing_var_arg = true, required = true)]
        cmd: Vec<String>,
    },
    /// Show the exit code of a command started with exec
    ExitCode { id: String, pid: i64 },
    /// Attach an interactive console
    Attach {
        id: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        safe: bool,
        /// Command to run instead of the default console
        #[arg(trailing_var_arg = true)]
        cmd: Vec<String>,
    },
    /// Resize an attached console
    ResizeConsole {
        id: String,
        #[arg(long)]
        height: u32,
        #[arg(long)]
        width: u32,
    },
    /// Print the guest console log
    Log {
        id: String,
        /// Number of trailing lines (all if 0)
        #[arg(short = 'n', long, default_value_t = 0)]
        lines: i64,
    },
    /// Print a file from inside the guest
    Cat { id: String, path: String },
    /// Copy a local file ("-" for stdin) into the guest
    Copy {
        id: String,
        src: String,
        dest: String,
        /// Allow replacing a directory with a file
        #[arg(long)]
        overwrite_dir: bool,
        /// Preserve the source owner
        #[arg(long)]
        uid_gid: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct CreateArgs {
    #[arg(long)]
    cpu: i64,
    /// Memory in bytes
    #[arg(long)]
    mem: i64,
    #[arg(long)]
    image: String,
    #[arg(long, default_value = "")]
    image_user: String,
    /// Volume as mount=size_in_bytes (repeatable)
    #[arg(long = "volume", value_parser = parse_volume)]
    volumes: Vec<(String, i64)>,
    /// Label as key=value (repeatable)
    #[arg(long = "label", value_parser = parse_key_val)]
    labels: Vec<(String, String)>,
    #[arg(long, default_value = "")]
    dmi_uuid: String,
    #[arg(long, default_value = "")]
    ancestor: String,
    #[arg(long)]
    lambda: bool,
    #[arg(long)]
    stdin: bool,
    /// Command for lambda guests
    #[arg(trailing_var_arg = true)]
    cmd: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum NetworkCommands {
    /// Plug a guest into a network
    Connect {
        id: String,
        network: String,
        #[arg(long, default_value = "")]
        ipv4: String,
    },
    /// Unplug a guest from a network
    Disconnect { id: String, network: String },
    /// List networks
    List {
        /// Network driver (repeatable)
        #[arg(long = "driver")]
        drivers: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum SnapshotCommands {
    /// List snapshots of a volume
    List {
        id: String,
        #[arg(long)]
        volume: String,
    },
    /// Snapshot a volume
    Create {
        id: String,
        #[arg(long)]
        volume: String,
    },
    /// Merge a snapshot into its volume
    Commit {
        id: String,
        #[arg(long)]
        volume: String,
        #[arg(long)]
        snapshot: String,
    },
    /// Roll a volume back to a snapshot
    Restore {
        id: String,
        #[arg(long)]
        volume: String,
        #[arg(long)]
        snapshot: String,
    },
}

#[derive(Subcommand, Debug)]
enum ImageCommands {
    /// Push an image to the registry
    Push {
        name: String,
        #[arg(long, default_value = "")]
        user: String,
    },
    /// Remove an image
    Remove {
        name: String,
        #[arg(long, default_value = "")]
        user: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        prune: bool,
    },
    /// List images
    List {
        #[arg(long, default_value = "")]
        filter: String,
    },
    /// Pull an image from the registry
    Pull {
        name: String,
        #[arg(long)]
        all: bool,
    },
    /// Show image digests
    Digest {
        name: String,
        /// Only consult the local store
        #[arg(long)]
        local: bool,
    },
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", s))?;
    if key.is_empty() {
        return Err(format!("empty key in {:?}", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_volume(s: &str) -> std::result::Result<(String, i64), String> {
    let (mount, size) = parse_key_val(s)?;
    let size = size
        .parse::<i64>()
        .map_err(|e| format!("invalid volume size in {:?}: {}", s, e))?;
    Ok((mount, size))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let path = args.config.clone().unwrap_or_else(ClientConfig::config_path);
    let mut config = ClientConfig::read_from_path(&path)?;
    if let Some(uri) = &args.uri {
        config.uri = uri.clone();
    }
    config.validate()?;

    yavirt_client::logging::init(&config.logging, args.verbose)?;
    debug!("Using yavirtd at {}", config.uri);

    let client = yavirt_client::from_config(&config)
        .with_context(|| format!("Failed to create client for {}", config.uri))?;

    let result = run(client.as_ref(), args.command, args.json).await;

    if args.print_metrics {
        eprintln!("{}", yavirt_client::metrics::gather_metrics()?);
    }

    result
}

async fn run(client: &dyn Client, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Info => {
            let info = client.info().await.context("Failed to get host info")?;
            emit(&info, json, |i| {
                format!(
                    "ID: {}\nCPU: {}\nMemory: {}\nStorage: {}",
                    i.id, i.cpu, i.mem, i.storage
                )
            })
        }
        Commands::Guest(cmd) => guest(client, cmd, json).await,
        Commands::Network(cmd) => network(client, cmd, json).await,
        Commands::Snapshot(cmd) => snapshot(client, cmd, json).await,
        Commands::Image(cmd) => image(client, cmd, json).await,
        Commands::Events { filters } => {
            let mut events = client
                .events(filters.into_iter().collect())
                .await
                .context("Failed to subscribe to events")?;
            info!("Watching events, press Ctrl-C to stop");

            while let Some(event) = events.next().await {
                let event = event?;
                emit(&event, json, |e| {
                    format!("{} {} {} {}", e.time().to_rfc3339(), e.kind, e.id, e.action)
                })?;
            }
            Ok(())
        }
    }
}

async fn guest(client: &dyn Client, cmd: GuestCommands, json: bool) -> Result<()> {
    match cmd {
        GuestCommands::Get { id } => {
            let guest = client.get_guest(&id).await?;
            emit(&guest, json, |g| {
                format!(
                    "ID: {}\nStatus: {}\nCPU: {}\nMemory: {}\nImage: {}\nIPs: {}\nHostname: {}",
                    g.id,
                    g.status,
                    g.cpu,
                    g.mem,
                    g.image_name,
                    g.ips.join(", "),
                    g.hostname
                )
            })
        }
        GuestCommands::Uuid { id } => {
            let uuid = client.get_guest_uuid(&id).await?;
            emit(&uuid, json, |u| u.clone())
        }
        GuestCommands::List { filters } => {
            let req = GetGuestIdListReq {
                filters: filters.into_iter().collect(),
            };
            let ids = client.get_guest_id_list(req).await?;
            emit(&ids, json, |ids| ids.join("\n"))
        }
        GuestCommands::Create(args) => {
            let req = CreateGuestReq {
                cpu: args.cpu,
                mem: args.mem,
                image_name: args.image,
                image_user: args.image_user,
                volumes: args.volumes.into_iter().collect(),
                dmi_uuid: args.dmi_uuid,
                labels: args.labels.into_iter().collect(),
                ancestor_id: args.ancestor,
                cmd: args.cmd,
                lambda: args.lambda,
                stdin: args.stdin,
                resources: HashMap::new(),
            };
            let guest = client.create_guest(req).await.context("Failed to create guest")?;
            emit(&guest, json, |g| g.id.clone())
        }
        GuestCommands::Start { id } => {
            let msg = client.start_guest(&id).await?;
            emit(&msg, json, |m| m.msg.clone())
        }
        GuestCommands::Stop { id, force } => {
            let msg = client.stop_guest(&id, force).await?;
            emit(&msg, json, |m| m.msg.clone())
        }
        GuestCommands::Destroy { id, force } => {
            let msg = client.destroy_guest(&id, force).await?;
            emit(&msg, json, |m| m.msg.clone())
        }
        GuestCommands::Wait { id, force } => {
            let result = client.wait_guest(&id, force).await?;
            emit(&result, json, |r| format!("{} (code {})", r.msg, r.code))
        }
        GuestCommands::Resize {
            id,
            cpu,
            mem,
            volumes,
        } => {
            let req = ResizeGuestReq {
                id,
                cpu,
                mem,
                volumes: volumes.into_iter().collect(),
                resources: HashMap::new(),
            };
            let msg = client.resize_guest(req).await?;
            emit(&msg, json, |m| m.msg.clone())
        }
        GuestCommands::Capture {
            id,
            name,
            user,
            overridden,
        } => {
            let req = CaptureGuestReq {
                id,
                user,
                name,
                overridden,
            };
            let image = client.capture_guest(req).await?;
            emit(&image, json, |i| {
                format!("{} (version {}, {} bytes)", i.name, i.latest_version, i.size)
            })
        }
        GuestCommands::Exec { id, cmd } => {
            let reply = client.execute_guest(&id, cmd).await?;
            if json {
                return emit(&reply, true, |_| String::new());
            }
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&reply.data).await?;
            stdout.flush().await?;
            if reply.exit_code != 0 {
                anyhow::bail!("Command exited with code {}", reply.exit_code);
            }
            Ok(())
        }
        GuestCommands::ExitCode { id, pid } => {
            let code = client.exec_exit_code(&id, pid).await?;
            emit(&code, json, |c| c.to_string())
        }
        GuestCommands::Attach {
            id,
            force,
            safe,
            cmd,
        } => attach(client, &id, cmd, AttachGuestFlags { force, safe }).await,
        GuestCommands::ResizeConsole { id, height, width } => {
            client.resize_console_window(&id, height, width).await?;
            Ok(())
        }
        GuestCommands::Log { id, lines } => copy_to_stdout(client.log(&id, lines).await?).await,
        GuestCommands::Cat { id, path } => copy_to_stdout(client.cat(&id, &path).await?).await,
        GuestCommands::Copy {
            id,
            src,
            dest,
            overwrite_dir,
            uid_gid,
        } => {
            let content: Content = if src == "-" {
                Box::new(tokio::io::stdin())
            } else {
                Box::new(
                    tokio::fs::File::open(&src)
                        .await
                        .with_context(|| format!("Failed to open {}", src))?,
                )
            };
            client
                .copy_to_guest(&id, &dest, content, overwrite_dir, uid_gid)
                .await
                .with_context(|| format!("Failed to copy {} to {}:{}", src, id, dest))?;
            info!("Copied {} to {}:{}", src, id, dest);
            Ok(())
        }
    }
}

async fn network(client: &dyn Client, cmd: NetworkCommands, json: bool) -> Result<()> {
    match cmd {
        NetworkCommands::Connect { id, network, ipv4 } => {
            let cidr = client
                .connect_network(ConnectNetworkReq { network, ipv4, id })
                .await?;
            emit(&cidr, json, |c| c.clone())
        }
        NetworkCommands::Disconnect { id, network } => {
            let msg = client
                .disconnect_network(DisconnectNetworkReq { network, id })
                .await?;
            emit(&msg, json, |m| m.clone())
        }
        NetworkCommands::List { drivers } => {
            let networks = client.network_list(drivers).await?;
            emit(&networks, json, |networks| {
                networks
                    .iter()
                    .map(|n| format!("{}\t{}", n.name, n.subnets.join(",")))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
    }
}

async fn snapshot(client: &dyn Client, cmd: SnapshotCommands, json: bool) -> Result<()> {
    match cmd {
        SnapshotCommands::List { id, volume } => {
            let snapshots = client.list_snapshot(&id, &volume).await?;
            emit(&snapshots, json, |snapshots| {
                snapshots
                    .iter()
                    .map(|s| format!("{}\t{}\t{}", s.snap_id, s.vol_id, s.created_time))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        SnapshotCommands::Create { id, volume } => {
            let msg = client.create_snapshot(&id, &volume).await?;
            emit(&msg, json, |m| m.msg.clone())
        }
        SnapshotCommands::Commit {
            id,
            volume,
            snapshot,
        } => {
            let msg = client.commit_snapshot(&id, &volume, &snapshot).await?;
            emit(&msg, json, |m| m.msg.clone())
        }
        SnapshotCommands::Restore {
            id,
            volume,
            snapshot,
        } => {
            let msg = client.restore_snapshot(&id, &volume, &snapshot).await?;
            emit(&msg, json, |m| m.msg.clone())
        }
    }
}

async fn image(client: &dyn Client, cmd: ImageCommands, json: bool) -> Result<()> {
    match cmd {
        ImageCommands::Push { name, user } => {
            let msg = client.push_image(&name, &user).await?;
            emit(&msg, json, |m| m.clone())
        }
        ImageCommands::Remove {
            name,
            user,
            force,
            prune,
        } => {
            let removed = client.remove_image(&name, &user, force, prune).await?;
            emit(&removed, json, |r| r.join("\n"))
        }
        ImageCommands::List { filter } => {
            let images = client.list_image(&filter).await?;
            emit(&images, json, |images| {
                images
                    .iter()
                    .map(|i| format!("{}\t{}\t{}\t{}", i.name, i.user, i.distro, i.size))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        ImageCommands::Pull { name, all } => {
            let msg = client.pull_image(&name, all).await?;
            emit(&msg, json, |m| m.clone())
        }
        ImageCommands::Digest { name, local } => {
            let digests = client.digest_image(&name, local).await?;
            emit(&digests, json, |d| d.join("\n"))
        }
    }
}

/// Forward stdin to an attached console and print its output
async fn attach(
    client: &dyn Client,
    id: &str,
    cmd: Vec<String>,
    flags: AttachGuestFlags,
) -> Result<()> {
    let console = client
        .attach_guest(id, cmd, flags)
        .await
        .with_context(|| format!("Failed to attach to guest {}", id))?;
    let (input, output) = console.into_parts();

    if let Some(input) = input {
        tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let mut buf = vec![0u8; 4096];
            loop {
                match stdin.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if input.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("stdin closed: {}", e);
                        break;
                    }
                }
            }
        });
    }

    copy_to_stdout(output).await
}

async fn copy_to_stdout(mut stream: ByteStream) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = stream.next().await {
        stdout.write_all(&chunk?).await?;
        stdout.flush().await?;
    }
    Ok(())
}

/// Print a result as JSON or as text
fn emit<T: Serialize>(value: &T, json: bool, text: impl FnOnce(&T) -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        let text = text(value);
        if !text.is_empty() {
            println!("{}", text);
        }
    }
    Ok(())
}
