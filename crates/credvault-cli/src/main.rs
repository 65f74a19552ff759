//! `CredVault` CLI: command-line client for the `CredVault` server.
//!
//! A standalone HTTP client that communicates with the `CredVault` server.
//! No internal crate dependencies; it talks exclusively to the REST API.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{Map, Value, json};

// ── ANSI color helpers ───────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

// ── CLI structure ────────────────────────────────────────────────────

/// CredVault: shared credentials, wrapped per group.
#[derive(Parser)]
#[command(
    name = "credvault",
    version,
    about = "CredVault CLI: manage accounts, groups, services and grants",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         CREDVAULT_ADDR      Server address (default: http://127.0.0.1:8300)\n  \
         CREDVAULT_ACCOUNT   Caller account id, sent as X-Account-Id\n\n\
         {DIM}Examples:{RESET}\n  \
         credvault status\n  \
         credvault group add-member <group> --member <id> --wrapped-key <blob>\n  \
         credvault service rotate-key <service> --file rotation.json\n  \
         credvault access"
    ),
)]
struct Cli {
    /// CredVault server address.
    #[arg(long, env = "CREDVAULT_ADDR", default_value = "http://127.0.0.1:8300")]
    addr: String,

    /// Account id to act as.
    #[arg(long, env = "CREDVAULT_ACCOUNT")]
    account: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show server health.
    Status,
    /// Account operations.
    Account {
        #[command(subcommand)]
        action: AccountCommands,
    },
    /// Group and membership operations.
    Group {
        #[command(subcommand)]
        action: GroupCommands,
    },
    /// Customer operations.
    Customer {
        #[command(subcommand)]
        action: CustomerCommands,
    },
    /// Service group operations.
    ServiceGroup {
        #[command(subcommand)]
        action: ServiceGroupCommands,
    },
    /// Service, grant and service key operations.
    Service {
        #[command(subcommand)]
        action: ServiceCommands,
    },
    /// List the services an account can reach and the keys leading there.
    Access {
        /// Account to resolve (defaults to the calling account).
        #[arg(long = "for")]
        target: Option<String>,
        /// Only show paths to this service.
        #[arg(long)]
        service: Option<String>,
    },
}

#[derive(Subcommand)]
enum AccountCommands {
    /// Register an account.
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        department: String,
        /// Public key blob.
        #[arg(long)]
        public_key: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// Show an account.
    Get { id: String },
    /// List accounts.
    List {
        /// Username substring.
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        department: Option<String>,
    },
    /// Delete an account and its memberships.
    Delete { id: String },
    /// Replace the public key and every group key wrapped for it.
    RotateKey {
        id: String,
        /// JSON file: `{"public_key": ..., "group_keys": {group: blob}}`.
        #[arg(long)]
        file: String,
    },
}

#[derive(Subcommand)]
enum GroupCommands {
    /// Create a group.
    Create {
        #[arg(long)]
        name: String,
        /// Group public key blob.
        #[arg(long)]
        public_key: String,
        /// Leave the group out of default listings.
        #[arg(long)]
        hidden: bool,
    },
    /// Show a group.
    Get { id: String },
    /// List groups.
    List {
        #[arg(long)]
        include_hidden: bool,
    },
    /// Delete a group.
    Delete { id: String },
    /// List a group's members.
    Members { id: String },
    /// Add an account to a group.
    AddMember {
        group: String,
        /// Account to add.
        #[arg(long)]
        member: String,
        /// Group private key wrapped for the account.
        #[arg(long)]
        wrapped_key: String,
        #[arg(long)]
        admin: bool,
    },
    /// Remove an account from a group.
    RemoveMember {
        group: String,
        #[arg(long)]
        member: String,
    },
    /// Install a new group keypair.
    RotateKey {
        id: String,
        /// JSON file: `{"public_key": ..., "member_keys": {...}, "grant_keys": {...}}`.
        #[arg(long)]
        file: String,
    },
}

#[derive(Subcommand)]
enum CustomerCommands {
    /// Create a customer.
    Create {
        #[arg(long)]
        name: String,
    },
    /// Show a customer.
    Get { id: String },
    /// List customers.
    List,
    /// Delete a customer and every service group it owns.
    Delete { id: String },
}

#[derive(Subcommand)]
enum ServiceGroupCommands {
    /// Create a service group.
    Create {
        #[arg(long)]
        customer: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        fqdn: Option<String>,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Show a service group.
    Get { id: String },
    /// List service groups.
    List {
        #[arg(long)]
        customer: Option<String>,
    },
    /// Delete a service group and its services.
    Delete { id: String },
}

#[derive(Subcommand)]
enum ServiceCommands {
    /// Create a service.
    Create {
        #[arg(long)]
        service_group: String,
        #[arg(long)]
        url: String,
        /// Secret ciphertext under the service key.
        #[arg(long)]
        secret: String,
        #[arg(long)]
        parent: Option<String>,
        /// Metadata as a JSON object, e.g. `{"port": 22}`.
        #[arg(long)]
        metadata: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Show a service.
    Get { id: String },
    /// List services.
    List {
        #[arg(long)]
        service_group: Option<String>,
    },
    /// Delete a service and its grants.
    Delete { id: String },
    /// Grant a group access to a service.
    Grant {
        service: String,
        #[arg(long)]
        group: String,
        /// Service key wrapped for the group.
        #[arg(long)]
        wrapped_key: String,
    },
    /// Revoke a group's access to a service.
    Revoke {
        service: String,
        #[arg(long)]
        group: String,
    },
    /// List the groups holding a grant on a service.
    Grants { id: String },
    /// Install a new service key.
    RotateKey {
        id: String,
        /// JSON file: `{"secret": ..., "grant_keys": {group: blob}}`.
        #[arg(long)]
        file: String,
    },
}

// ── Response types ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AccessResponse {
    account_id: String,
    entries: Vec<AccessEntry>,
}

#[derive(Debug, Deserialize)]
struct AccessEntry {
    service_id: String,
    service_url: String,
    group_name: String,
    path: WrappingPath,
}

#[derive(Debug, Deserialize)]
struct WrappingPath {
    wrapped_group_key: String,
    group_key_generation: u64,
    wrapped_service_key: String,
    service_key_generation: u64,
    secret: String,
}

// ── Pretty output helpers ────────────────────────────────────────────

fn header(title: &str) {
    println!("{BOLD}{CYAN}{title}{RESET}");
    println!("{DIM}─────────────────────────────────────────{RESET}");
}

fn kv_line(key: &str, value: &str) {
    println!("  {DIM}{key:<20}{RESET} {WHITE}{value}{RESET}");
}

fn success(msg: &str) {
    println!("{GREEN}{BOLD}✓{RESET} {msg}");
}

fn print_json(value: &Value) {
    if value.is_null() {
        return;
    }
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("failed to format JSON: {e}"),
    }
}

fn print_access(resp: &AccessResponse) {
    header(&format!("Access for {}", resp.account_id));
    if resp.entries.is_empty() {
        println!("  {DIM}no reachable services{RESET}");
    }
    for entry in &resp.entries {
        println!();
        kv_line("Service", &format!("{} ({})", entry.service_url, entry.service_id));
        kv_line("Via group", &entry.group_name);
        kv_line(
            "Group key",
            &format!(
                "gen {} {}",
                entry.path.group_key_generation, entry.path.wrapped_group_key
            ),
        );
        kv_line(
            "Service key",
            &format!(
                "gen {} {}",
                entry.path.service_key_generation, entry.path.wrapped_service_key
            ),
        );
        kv_line("Secret", &entry.path.secret);
    }
    println!();
}

// ── HTTP client ──────────────────────────────────────────────────────

struct Client {
    http: reqwest::Client,
    addr: String,
    account: Option<String>,
}

impl Client {
    fn new(addr: String, account: Option<String>) -> Self {
        let http = reqwest::Client::new();
        let addr = addr.trim_end_matches('/').to_owned();
        Self {
            http,
            addr,
            account,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.addr)
    }

    fn caller(&self) -> Result<&str> {
        self.account
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no account given; set CREDVAULT_ACCOUNT or use --account"))
    }

    /// Attach the caller header when one is configured. Registering the
    /// first account of an empty vault works without it.
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match &self.account {
            Some(account) => builder.header("X-Account-Id", account),
            None => builder,
        }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let resp = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .context("request failed")?;
        handle_response(resp).await
    }

    /// GET with the present `(key, value)` pairs as the query string.
    async fn get_filtered(&self, path: &str, params: &[(&str, Option<String>)]) -> Result<Value> {
        let query: Vec<(&str, &str)> = params
            .iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (*k, v)))
            .collect();
        let resp = self
            .request(reqwest::Method::GET, path)
            .query(&query)
            .send()
            .await
            .context("request failed")?;
        handle_response(resp).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let resp = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await
            .context("request failed")?;
        handle_response(resp).await
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        let resp = self
            .request(reqwest::Method::DELETE, path)
            .send()
            .await
            .context("request failed")?;
        handle_response(resp).await
    }
}

async fn handle_response(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    if status == reqwest::StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }
    let body = resp.text().await.context("failed to read response body")?;
    if !status.is_success() {
        // Prefer the server's message over the raw JSON envelope.
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned))
            .unwrap_or(body);
        bail!("server returned {status}: {message}");
    }
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).context("failed to parse response JSON")
}

// ── Command dispatch ─────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let client = Client::new(cli.addr, cli.account);

    match run(client, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            eprintln!();
            ExitCode::FAILURE
        }
    }
}

async fn run(client: Client, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Status => cmd_status(&client).await,
        Commands::Account { action } => cmd_account(&client, action).await,
        Commands::Group { action } => cmd_group(&client, action).await,
        Commands::Customer { action } => cmd_customer(&client, action).await,
        Commands::ServiceGroup { action } => cmd_service_group(&client, action).await,
        Commands::Service { action } => cmd_service(&client, action).await,
        Commands::Access { target, service } => {
            cmd_access(&client, target.as_deref(), service.as_deref()).await
        }
    }
}

// ── System commands ──────────────────────────────────────────────────

async fn cmd_status(client: &Client) -> Result<()> {
    let resp = client.get("/v1/sys/health").await?;
    let initialized = resp
        .get("initialized")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let version = resp.get("version").and_then(Value::as_str).unwrap_or("?");

    header("CredVault Status");
    kv_line("Server", &client.addr);
    kv_line("Version", version);
    let init = if initialized {
        format!("{GREEN}yes{RESET}")
    } else {
        format!("{RED}no{RESET} (register the first account)")
    };
    kv_line("Initialized", &init);
    println!();
    Ok(())
}

// ── Account commands ─────────────────────────────────────────────────

async fn cmd_account(client: &Client, action: AccountCommands) -> Result<()> {
    match action {
        AccountCommands::Create {
            username,
            department,
            public_key,
            email,
        } => {
            let body = json!({
                "username": username,
                "department": department,
                "public_key": public_key,
                "email": email,
            });
            let resp = client.post("/v1/accounts", &body).await?;
            success(&format!("account '{username}' registered"));
            print_json(&resp);
        }
        AccountCommands::Get { id } => {
            print_json(&client.get(&format!("/v1/accounts/{id}")).await?);
        }
        AccountCommands::List {
            username,
            department,
        } => {
            let params = [("username", username), ("department", department)];
            print_json(&client.get_filtered("/v1/accounts", &params).await?);
        }
        AccountCommands::Delete { id } => {
            client.delete(&format!("/v1/accounts/{id}")).await?;
            success(&format!("account {id} deleted"));
        }
        AccountCommands::RotateKey { id, file } => {
            let body = read_json_file(&file)?;
            let resp = client
                .post(&format!("/v1/accounts/{id}/rotate-key"), &body)
                .await?;
            success(&format!("account {id} key rotated"));
            print_json(&resp);
        }
    }
    Ok(())
}

// ── Group commands ───────────────────────────────────────────────────

async fn cmd_group(client: &Client, action: GroupCommands) -> Result<()> {
    match action {
        GroupCommands::Create {
            name,
            public_key,
            hidden,
        } => {
            let body = json!({"name": name, "public_key": public_key, "is_hidden": hidden});
            let resp = client.post("/v1/groups", &body).await?;
            success(&format!("group '{name}' created"));
            print_json(&resp);
        }
        GroupCommands::Get { id } => {
            print_json(&client.get(&format!("/v1/groups/{id}")).await?);
        }
        GroupCommands::List { include_hidden } => {
            let params = [("include_hidden", include_hidden.then(|| "true".to_owned()))];
            print_json(&client.get_filtered("/v1/groups", &params).await?);
        }
        GroupCommands::Delete { id } => {
            client.delete(&format!("/v1/groups/{id}")).await?;
            success(&format!("group {id} deleted"));
        }
        GroupCommands::Members { id } => {
            print_json(&client.get(&format!("/v1/groups/{id}/members")).await?);
        }
        GroupCommands::AddMember {
            group,
            member,
            wrapped_key,
            admin,
        } => {
            let body = json!({
                "account_id": member,
                "wrapped_group_key": wrapped_key,
                "is_admin": admin,
            });
            client
                .post(&format!("/v1/groups/{group}/members"), &body)
                .await?;
            success(&format!("account {member} added to group {group}"));
        }
        GroupCommands::RemoveMember { group, member } => {
            client
                .delete(&format!("/v1/groups/{group}/members/{member}"))
                .await?;
            success(&format!("account {member} removed from group {group}"));
        }
        GroupCommands::RotateKey { id, file } => {
            let body = read_json_file(&file)?;
            let resp = client
                .post(&format!("/v1/groups/{id}/rotate-key"), &body)
                .await?;
            let generation = resp
                .get("key_generation")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            success(&format!("group {id} rotated to key generation {generation}"));
        }
    }
    Ok(())
}

// ── Asset commands ───────────────────────────────────────────────────

async fn cmd_customer(client: &Client, action: CustomerCommands) -> Result<()> {
    match action {
        CustomerCommands::Create { name } => {
            let resp = client.post("/v1/customers", &json!({"name": name})).await?;
            success(&format!("customer '{name}' created"));
            print_json(&resp);
        }
        CustomerCommands::Get { id } => {
            print_json(&client.get(&format!("/v1/customers/{id}")).await?);
        }
        CustomerCommands::List => print_json(&client.get("/v1/customers").await?),
        CustomerCommands::Delete { id } => {
            client.delete(&format!("/v1/customers/{id}")).await?;
            success(&format!("customer {id} deleted"));
        }
    }
    Ok(())
}

async fn cmd_service_group(client: &Client, action: ServiceGroupCommands) -> Result<()> {
    match action {
        ServiceGroupCommands::Create {
            customer,
            name,
            parent,
            fqdn,
            ip,
            location,
            notes,
        } => {
            let body = json!({
                "customer_id": customer,
                "parent_id": parent,
                "name": name,
                "fqdn": fqdn,
                "ip": ip,
                "location": location,
                "notes": notes,
            });
            let resp = client.post("/v1/service-groups", &body).await?;
            success(&format!("service group '{name}' created"));
            print_json(&resp);
        }
        ServiceGroupCommands::Get { id } => {
            print_json(&client.get(&format!("/v1/service-groups/{id}")).await?);
        }
        ServiceGroupCommands::List { customer } => {
            let params = [("customer_id", customer)];
            print_json(&client.get_filtered("/v1/service-groups", &params).await?);
        }
        ServiceGroupCommands::Delete { id } => {
            client.delete(&format!("/v1/service-groups/{id}")).await?;
            success(&format!("service group {id} deleted"));
        }
    }
    Ok(())
}

async fn cmd_service(client: &Client, action: ServiceCommands) -> Result<()> {
    match action {
        ServiceCommands::Create {
            service_group,
            url,
            secret,
            parent,
            metadata,
            notes,
        } => {
            let metadata = match metadata {
                Some(raw) => serde_json::from_str::<Value>(&raw)
                    .context("--metadata must be a JSON object")?,
                None => Value::Object(Map::new()),
            };
            let body = json!({
                "service_group_id": service_group,
                "parent_id": parent,
                "url": url,
                "secret": secret,
                "metadata": metadata,
                "notes": notes,
            });
            let resp = client.post("/v1/services", &body).await?;
            success(&format!("service '{url}' created"));
            print_json(&resp);
        }
        ServiceCommands::Get { id } => {
            print_json(&client.get(&format!("/v1/services/{id}")).await?);
        }
        ServiceCommands::List { service_group } => {
            let params = [("service_group_id", service_group)];
            print_json(&client.get_filtered("/v1/services", &params).await?);
        }
        ServiceCommands::Delete { id } => {
            client.delete(&format!("/v1/services/{id}")).await?;
            success(&format!("service {id} deleted"));
        }
        ServiceCommands::Grant {
            service,
            group,
            wrapped_key,
        } => {
            let body = json!({"group_id": group, "wrapped_service_key": wrapped_key});
            client
                .post(&format!("/v1/services/{service}/grants"), &body)
                .await?;
            success(&format!("group {group} granted access to service {service}"));
        }
        ServiceCommands::Revoke { service, group } => {
            client
                .delete(&format!("/v1/services/{service}/grants/{group}"))
                .await?;
            success(&format!("group {group} no longer has access to service {service}"));
        }
        ServiceCommands::Grants { id } => {
            print_json(&client.get(&format!("/v1/services/{id}/grants")).await?);
        }
        ServiceCommands::RotateKey { id, file } => {
            let body = read_json_file(&file)?;
            let resp = client
                .post(&format!("/v1/services/{id}/rotate-key"), &body)
                .await?;
            let generation = resp
                .get("key_generation")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            success(&format!("service {id} rotated to key generation {generation}"));
        }
    }
    Ok(())
}

// ── Access commands ──────────────────────────────────────────────────

async fn cmd_access(client: &Client, target: Option<&str>, service: Option<&str>) -> Result<()> {
    let account = match target {
        Some(target) => target,
        None => client.caller()?,
    };
    let path = match service {
        Some(service) => format!("/v1/accounts/{account}/access/{service}"),
        None => format!("/v1/accounts/{account}/access"),
    };
    let resp: AccessResponse = serde_json::from_value(client.get(&path).await?)
        .context("unexpected access response")?;
    print_access(&resp);
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Read a rotation document. The server checks its contents.
fn read_json_file(path: &str) -> Result<Value> {
    let content = std::fs::read_to_string(Path::new(path))
        .with_context(|| format!("failed to read {path}"))?;
    let value: Value =
        serde_json::from_str(&content).with_context(|| format!("failed to parse {path}"))?;
    if !value.is_object() {
        bail!("{path} must contain a JSON object");
    }
    Ok(value)
}
