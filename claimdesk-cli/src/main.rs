//! claimdesk-cli — operator CLI for the claimdesk admin API
//!
//! Talks to a running claimdesk server over HTTP. Admin routes use the bearer
//! token from `--token` / `ADMIN_API_TOKEN` when one is set.
//!
//! # Subcommands
//! - `status`                              — server health
//! - `show <id>`                           — session detail with edit history
//! - `edit <id> --reason <text> [fields]`  — audited result edit
//! - `render <id>`                         — re-render the report
//! - `deactivate <id>`                     — stop redemption of a session
//! - `dashboard`                           — counts and recent sessions
//! - `customers`                           — customers with session counts
//! - `customer <id>`                       — one customer and their sessions
//! - `follow-up <id> --status <s> [...]`   — update customer follow-up
//!
//! `--json` prints the raw response body instead of the text view.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::blocking::Client;
use reqwest::Method;
use serde_json::{json, Map, Value};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";
const LIKELIHOODS: [&str; 4] = ["high", "medium", "low", "none"];

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "claimdesk-cli", version, about = "claimdesk operator CLI")]
struct Cli {
    /// claimdesk HTTP server URL (overrides CLAIMDESK_HTTP_URL env var)
    #[arg(long, env = "CLAIMDESK_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Admin bearer token
    #[arg(long, env = "ADMIN_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show server health
    Status,

    /// Show one session and its edit history
    Show { id: String },

    /// Edit a session's result (a reason is always recorded)
    Edit {
        id: String,

        /// Why the change is made
        #[arg(long)]
        reason: String,

        /// Name recorded in the edit history
        #[arg(long)]
        actor: Option<String>,

        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=10))]
        severity: Option<u8>,

        #[arg(long)]
        cost_min: Option<u32>,

        #[arg(long)]
        cost_max: Option<u32>,

        #[arg(long)]
        first_aid: Option<u32>,

        /// high, medium, low or none
        #[arg(long)]
        likelihood: Option<String>,

        #[arg(long)]
        plan: Option<String>,

        #[arg(long)]
        locations: Option<String>,

        #[arg(long)]
        details: Option<String>,

        /// Admin workflow status
        #[arg(long)]
        status: Option<String>,
    },

    /// Re-render a session's report
    Render { id: String },

    /// Deactivate a session so its code can no longer be redeemed
    Deactivate { id: String },

    /// Show dashboard counts and recent sessions
    Dashboard,

    /// List customers, newest first
    Customers,

    /// Show one customer and every session under their phone or email
    Customer { id: String },

    /// Update a customer's follow-up status; omitted fields are cleared
    FollowUp {
        id: String,

        #[arg(long)]
        status: String,

        #[arg(long)]
        next_action: Option<String>,

        /// YYYY-MM-DD
        #[arg(long)]
        next_action_date: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },
}

/// Field flags of `edit`, in API naming.
#[derive(Debug, Default, Clone)]
struct EditFields {
    severity: Option<u8>,
    cost_min: Option<u32>,
    cost_max: Option<u32>,
    first_aid: Option<u32>,
    likelihood: Option<String>,
    plan: Option<String>,
    locations: Option<String>,
    details: Option<String>,
    status: Option<String>,
}

/// Build the PATCH body for an edit. At least one field must be set.
fn edit_body(fields: EditFields, reason: &str, actor: Option<&str>) -> anyhow::Result<Value> {
    if reason.trim().is_empty() {
        bail!("--reason must not be empty");
    }

    let mut body = Map::new();
    let mut set = |key: &str, value: Option<Value>| {
        if let Some(v) = value {
            body.insert(key.to_string(), v);
        }
    };
    set("severityScore", fields.severity.map(Value::from));
    set("estimatedCostMin", fields.cost_min.map(Value::from));
    set("estimatedCostMax", fields.cost_max.map(Value::from));
    set("firstAidCost", fields.first_aid.map(Value::from));
    if let Some(l) = &fields.likelihood {
        let l = l.trim().to_ascii_lowercase();
        if !LIKELIHOODS.contains(&l.as_str()) {
            bail!("--likelihood must be one of {}", LIKELIHOODS.join(", "));
        }
        set("insuranceLikelihood", Some(Value::from(l)));
    }
    set("recommendedPlan", fields.plan.map(Value::from));
    set("damageLocations", fields.locations.map(Value::from));
    set("damageDescription", fields.details.map(Value::from));
    set("adminStatus", fields.status.map(Value::from));

    if body.is_empty() {
        bail!("nothing to edit: pass at least one field flag");
    }
    if let (Some(min), Some(max)) = (fields.cost_min, fields.cost_max) {
        if min > max {
            bail!("--cost-min ({}) is greater than --cost-max ({})", min, max);
        }
    }

    body.insert("reason".to_string(), json!(reason.trim()));
    if let Some(actor) = actor {
        body.insert("actor".to_string(), json!(actor));
    }
    Ok(Value::Object(body))
}

fn follow_up_body(
    status: &str,
    next_action: Option<String>,
    next_action_date: Option<String>,
    notes: Option<String>,
) -> anyhow::Result<Value> {
    if status.trim().is_empty() {
        bail!("--status must not be empty");
    }
    Ok(json!({
        "status": status.trim(),
        "nextAction": next_action,
        "nextActionDate": next_action_date.map(|d| d.trim().to_string()),
        "notes": notes,
    }))
}

// ============================================================================
// Text views
// ============================================================================

fn yen(v: &Value) -> String {
    let Some(n) = v.as_u64() else {
        return "?".to_string();
    };
    let digits = n.to_string();
    let mut out = String::from("¥");
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn text<'a>(v: &'a Value, fallback: &'a str) -> &'a str {
    v.as_str().unwrap_or(fallback)
}

fn format_session(detail: &Value) -> String {
    let s = &detail["session"];
    let r = &s["result"];
    let mut out = String::new();
    out.push_str(&format!("Session:     {}\n", text(&s["id"], "?")));
    out.push_str(&format!("Claim code:  {}\n", text(&s["claimCode"], "?")));
    out.push_str(&format!(
        "Customer:    {} ({})\n",
        text(&s["contact"]["name"], "?"),
        text(&s["contact"]["phone"], "?")
    ));
    out.push_str(&format!(
        "State:       {} / admin: {}\n",
        if s["active"].as_bool().unwrap_or(false) { "active" } else { "inactive" },
        text(&s["adminStatus"], "?")
    ));
    out.push_str(&format!(
        "Redeemed:    {}/{}\n",
        s["retryCount"], s["maxRetries"]
    ));
    out.push_str(&format!("Expires:     {}\n", text(&s["expiresAt"], "?")));
    let report = match (s["reportRef"].as_str(), s["reportStale"].as_bool()) {
        (Some(r), Some(true)) => format!("{} (stale)", r),
        (Some(r), _) => r.to_string(),
        (None, _) => "not rendered".to_string(),
    };
    out.push_str(&format!("Report:      {}\n\n", report));

    out.push_str(&format!("Severity:    {}/10\n", r["severityScore"]));
    out.push_str(&format!("Likelihood:  {}\n", text(&r["insuranceLikelihood"], "?")));
    out.push_str(&format!(
        "Repair:      {} – {}\n",
        yen(&r["estimatedCostMin"]),
        yen(&r["estimatedCostMax"])
    ));
    out.push_str(&format!("First aid:   {}\n", yen(&r["firstAidCost"])));
    out.push_str(&format!("Locations:   {}\n", text(&r["damageLocations"], "")));
    out.push_str(&format!("Details:     {}\n", text(&r["damageDescription"], "")));
    out.push_str(&format!("Plan:        {}\n", text(&r["recommendedPlan"], "")));

    if let Some(history) = detail["history"].as_array() {
        if !history.is_empty() {
            out.push_str("\nHistory:\n");
        }
        for entry in history {
            out.push_str(&format!(
                "  {}  {}: {}  {}\n",
                text(&entry["createdAt"], "?"),
                text(&entry["actor"], "?"),
                text(&entry["reason"], ""),
                entry["next"]
            ));
        }
    }
    out
}

fn format_counts(label: &str, c: &Value) -> String {
    format!(
        "{:<10} total {:>4}  live {:>4}  with report {:>4}  redeemed {:>4}\n",
        label, c["total"], c["live"], c["withReport"], c["redeemed"]
    )
}

fn format_dashboard(dashboard: &Value) -> String {
    let mut out = String::new();
    out.push_str(&format_counts("24h", &dashboard["last24h"]));
    out.push_str(&format_counts("7 days", &dashboard["last7d"]));

    let recent = dashboard["recent"].as_array().cloned().unwrap_or_default();
    if recent.is_empty() {
        out.push_str("\nNo sessions yet.\n");
        return out;
    }
    out.push_str("\nRecent:\n");
    for s in &recent {
        out.push_str(&format!(
            "  {}  {}  {:<12} sev {:>2}  {:<6}  {}{}\n",
            text(&s["id"], "?"),
            text(&s["claimCode"], "????"),
            text(&s["customerName"], "?"),
            s["severityScore"],
            text(&s["insuranceLikelihood"], "?"),
            if s["active"].as_bool().unwrap_or(false) { "active" } else { "inactive" },
            if s["hasReport"].as_bool().unwrap_or(false) { "" } else { "  (no report)" },
        ));
    }
    out
}

fn format_customers(body: &Value) -> String {
    let customers = body["customers"].as_array().cloned().unwrap_or_default();
    if customers.is_empty() {
        return "No customers yet.\n".to_string();
    }
    let mut out = String::new();
    for c in &customers {
        out.push_str(&format!(
            "  {}  {:<12} {:<13} {:<10} sessions {:>3}  {}\n",
            text(&c["id"], "?"),
            text(&c["name"], "-"),
            text(&c["phone"], "-"),
            text(&c["followUpStatus"], "?"),
            c["sessionCount"].as_u64().unwrap_or(0),
            text(&c["nextAction"], ""),
        ));
    }
    out
}

fn format_customer(detail: &Value) -> String {
    let c = &detail["customer"];
    let mut out = String::new();
    out.push_str(&format!("Customer:    {}\n", text(&c["id"], "?")));
    out.push_str(&format!("Name:        {}\n", text(&c["name"], "-")));
    out.push_str(&format!("Phone:       {}\n", text(&c["phone"], "-")));
    out.push_str(&format!("Email:       {}\n", text(&c["email"], "-")));
    out.push_str(&format!("Follow-up:   {}\n", text(&c["followUpStatus"], "?")));
    if let Some(action) = c["nextAction"].as_str() {
        out.push_str(&format!(
            "Next:        {} {}\n",
            action,
            text(&c["nextActionDate"], "")
        ));
    }
    if let Some(notes) = c["notes"].as_str() {
        out.push_str(&format!("Notes:       {}\n", notes));
    }

    let sessions = detail["sessions"].as_array().cloned().unwrap_or_default();
    out.push_str(&format!("\nSessions ({}):\n", sessions.len()));
    for s in &sessions {
        out.push_str(&format!(
            "  {}  {}  sev {:>2}  {}\n",
            text(&s["createdAt"], "?"),
            text(&s["claimCode"], "????"),
            s["severityScore"],
            if s["active"].as_bool().unwrap_or(false) { "active" } else { "inactive" },
        ));
    }
    out
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

struct Api {
    client: Client,
    server: String,
    token: Option<String>,
}

impl Api {
    fn new(server: &str, token: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            server: server.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    fn call(&self, method: Method, path: &str, body: Option<&Value>) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.server, path);
        let mut req = self.client.request(method, &url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .with_context(|| format!("connection failed to {}", url))?;
        let status = resp.status();
        let body: Value = resp.json().unwrap_or_default();
        if !status.is_success() {
            bail!(
                "server returned {}: {}",
                status,
                body["error"].as_str().unwrap_or("no details")
            );
        }
        Ok(body)
    }
}

fn print(json_output: bool, body: &Value, view: impl FnOnce(&Value) -> String) -> anyhow::Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(body)?);
    } else {
        print!("{}", view(body));
    }
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let api = Api::new(&cli.server, cli.token)?;
    let json_output = cli.json;

    match cli.command {
        Commands::Status => {
            let body = api.call(Method::GET, "/health", None)?;
            print(json_output, &body, |b| {
                format!(
                    "claimdesk server: {}\nVersion:          {}\nStore:            {}\nObject store:     {}\nPostgreSQL:       {}\n",
                    text(&b["status"], "unknown"),
                    text(&b["version"], "?"),
                    text(&b["store"], "?"),
                    text(&b["objectStore"], "?"),
                    text(&b["postgresql"], "-"),
                )
            })
        }
        Commands::Show { id } => {
            let body = api.call(Method::GET, &format!("/api/admin/diagnosis/{}", id), None)?;
            print(json_output, &body, format_session)
        }
        Commands::Edit {
            id,
            reason,
            actor,
            severity,
            cost_min,
            cost_max,
            first_aid,
            likelihood,
            plan,
            locations,
            details,
            status,
        } => {
            let fields = EditFields {
                severity,
                cost_min,
                cost_max,
                first_aid,
                likelihood,
                plan,
                locations,
                details,
                status,
            };
            let request = edit_body(fields, &reason, actor.as_deref())?;
            let body = api.call(
                Method::PATCH,
                &format!("/api/admin/diagnosis/{}", id),
                Some(&request),
            )?;
            print(json_output, &body, |b| {
                let note = if b["rerendered"].as_bool().unwrap_or(false) {
                    "report re-rendered"
                } else if b["session"]["reportStale"].as_bool().unwrap_or(false) {
                    "report is stale, run `render` to refresh it"
                } else {
                    "report unchanged"
                };
                format!("Edited {}: {} ({})\n", id, b["entry"]["next"], note)
            })
        }
        Commands::Render { id } => {
            let path = format!("/api/admin/diagnosis/{}/render", id);
            let body = api.call(Method::POST, &path, None)?;
            print(json_output, &body, |b| {
                format!("Report: {}\n", text(&b["reportRef"], "?"))
            })
        }
        Commands::Deactivate { id } => {
            let path = format!("/api/admin/diagnosis/{}/deactivate", id);
            let body = api.call(Method::POST, &path, None)?;
            print(json_output, &body, |b| {
                if b["changed"].as_bool().unwrap_or(false) {
                    format!("Session {} deactivated\n", id)
                } else {
                    format!("Session {} was already inactive\n", id)
                }
            })
        }
        Commands::Dashboard => {
            let body = api.call(Method::GET, "/api/admin/dashboard", None)?;
            print(json_output, &body, format_dashboard)
        }
        Commands::Customers => {
            let body = api.call(Method::GET, "/api/admin/customers", None)?;
            print(json_output, &body, format_customers)
        }
        Commands::Customer { id } => {
            let body = api.call(Method::GET, &format!("/api/admin/customers/{}", id), None)?;
            print(json_output, &body, format_customer)
        }
        Commands::FollowUp {
            id,
            status,
            next_action,
            next_action_date,
            notes,
        } => {
            let request = follow_up_body(&status, next_action, next_action_date, notes)?;
            let body = api.call(
                Method::PATCH,
                &format!("/api/admin/customers/{}", id),
                Some(&request),
            )?;
            print(json_output, &body, |b| {
                format!(
                    "Customer {} follow-up: {}\n",
                    id,
                    text(&b["customer"]["followUpStatus"], "?")
                )
            })
        }
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("claimdesk-cli: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
