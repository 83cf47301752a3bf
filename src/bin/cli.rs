use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use docvault::analytics::{DashboardResponse, ExpiringResponse};
use docvault::error::ErrorBody;
use docvault::models::{DocumentListResponse, DocumentResponse, DocumentView, MessageResponse};
use docvault::user_models::{LoginResponse, UserResponse};
use prettytable::{Cell, Row, Table};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const SESSION_FILE: &str = ".docvault-session";

#[derive(Parser)]
#[command(name = "docvault")]
#[command(about = "A CLI tool for tracking contracts, licenses and certificates", long_about = None)]
struct Cli {
    #[arg(long, env = "DOCVAULT_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create a new account")]
    Register {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        password: String,
    },

    #[command(about = "Log in and remember the session token")]
    Login {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        password: String,
    },

    #[command(about = "Log out and forget the session token")]
    Logout,

    #[command(about = "Show the logged in user")]
    Whoami,

    #[command(about = "List documents")]
    List {
        #[arg(short, long, help = "Active, Expiring Soon, Expired or Renewed")]
        status: Option<String>,

        #[arg(short = 't', long = "type", help = "Document type filter")]
        document_type: Option<String>,

        #[arg(short = 'q', long, help = "Search title, number and issuer")]
        search: Option<String>,

        #[arg(long, help = "Sort field, prefix with '-' for descending (default -expiryDate)")]
        sort_by: Option<String>,

        #[arg(short, long, default_value_t = 1)]
        page: usize,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    #[command(about = "Show one document")]
    Show { id: String },

    #[command(about = "Submit a new document")]
    Create {
        #[arg(long)]
        title: String,

        #[arg(short = 't', long = "type")]
        document_type: String,

        #[arg(long, help = "Issue date (YYYY-MM-DD)")]
        issue_date: String,

        #[arg(long, help = "Expiry date (YYYY-MM-DD)")]
        expiry_date: String,

        #[arg(long)]
        number: Option<String>,

        #[arg(long)]
        issuer: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        #[arg(short, long, help = "pdf, doc, docx, jpg, jpeg or png file to attach")]
        file: Option<PathBuf>,
    },

    #[command(about = "Change fields of a document or replace its file")]
    Update {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short = 't', long = "type")]
        document_type: Option<String>,

        #[arg(long)]
        issue_date: Option<String>,

        #[arg(long)]
        expiry_date: Option<String>,

        #[arg(long)]
        number: Option<String>,

        #[arg(long)]
        issuer: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        #[arg(long, help = "Set to Renewed, or to any other status to clear it")]
        status: Option<String>,

        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    #[command(about = "Delete a document and its file")]
    Delete { id: String },

    #[command(about = "Download the file attached to a document")]
    Download {
        id: String,

        #[arg(short, long, help = "Where to write the file (defaults to the original name)")]
        output: Option<PathBuf>,
    },

    #[command(about = "Show document counts and upcoming expiries")]
    Dashboard,

    #[command(about = "List documents expiring within the given number of days")]
    Expiring {
        #[arg(short, long)]
        days: Option<i64>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Session {
    token: String,
    username: String,
}

impl Session {
    fn save(&self) -> Result<()> {
        let json = serde_json::to_string(self)?;
        fs::write(SESSION_FILE, json)?;
        Ok(())
    }

    fn load() -> Option<Self> {
        if Path::new(SESSION_FILE).exists() {
            let data = fs::read_to_string(SESSION_FILE).ok()?;
            serde_json::from_str(&data).ok()
        } else {
            None
        }
    }

    fn clear() -> Result<()> {
        if Path::new(SESSION_FILE).exists() {
            fs::remove_file(SESSION_FILE)?;
        }
        Ok(())
    }
}

struct Api {
    client: Client,
    base: String,
    session: Option<Session>,
}

impl Api {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base.trim_end_matches('/'), path)
    }

    fn authed(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let session = self.session.as_ref().ok_or_else(|| {
            anyhow::anyhow!("You must be logged in. Use: docvault login -u <username> -p <password>")
        })?;
        Ok(request.bearer_auth(&session.token))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let api = Api {
        client: Client::new(),
        base: cli.api_url,
        session: Session::load(),
    };

    if let Err(e) = run_command(&api, cli.command).await {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_command(api: &Api, command: Commands) -> Result<()> {
    match command {
        Commands::Register { username, password } => register(api, username, password).await,
        Commands::Login { username, password } => login(api, username, password).await,
        Commands::Logout => logout(api).await,
        Commands::Whoami => whoami(api).await,
        Commands::List {
            status,
            document_type,
            search,
            sort_by,
            page,
            limit,
        } => {
            let filters = ListFilters {
                status,
                document_type,
                search,
                sort_by,
                limit,
            };
            list_documents(api, &filters, page).await
        }
        Commands::Show { id } => show_document(api, &id).await,
        Commands::Create {
            title,
            document_type,
            issue_date,
            expiry_date,
            number,
            issuer,
            notes,
            file,
        } => {
            let mut form = Form::new()
                .text("title", title)
                .text("documentType", document_type)
                .text("issueDate", issue_date)
                .text("expiryDate", expiry_date);
            form = add_optional(form, "documentNumber", number);
            form = add_optional(form, "issuer", issuer);
            form = add_optional(form, "notes", notes);
            if let Some(path) = file {
                form = form.part("file", file_part(&path)?);
            }
            create_document(api, form).await
        }
        Commands::Update {
            id,
            title,
            document_type,
            issue_date,
            expiry_date,
            number,
            issuer,
            notes,
            status,
            file,
        } => {
            let mut form = Form::new();
            form = add_optional(form, "title", title);
            form = add_optional(form, "documentType", document_type);
            form = add_optional(form, "issueDate", issue_date);
            form = add_optional(form, "expiryDate", expiry_date);
            form = add_optional(form, "documentNumber", number);
            form = add_optional(form, "issuer", issuer);
            form = add_optional(form, "notes", notes);
            form = add_optional(form, "status", status);
            if let Some(path) = file {
                form = form.part("file", file_part(&path)?);
            }
            update_document(api, &id, form).await
        }
        Commands::Delete { id } => delete_document(api, &id).await,
        Commands::Download { id, output } => download_document(api, &id, output).await,
        Commands::Dashboard => dashboard(api).await,
        Commands::Expiring { days } => expiring(api, days).await,
    }
}

fn add_optional(form: Form, name: &'static str, value: Option<String>) -> Form {
    match value {
        Some(value) => form.text(name, value),
        None => form,
    }
}

fn file_part(path: &Path) -> Result<Part> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    let mime = mime_guess::from_path(path).first_or_octet_stream();

    Part::bytes(bytes)
        .file_name(file_name)
        .mime_str(mime.as_ref())
        .context("Invalid MIME type")
}

/// Turns a non-success response into an error carrying the server's message
/// and any field problems.
async fn check(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => {
            let mut message = format!("{} ({})", body.message, status);
            for field in body.errors.unwrap_or_default() {
                message.push_str(&format!("\n   • {}: {}", field.field, field.message));
            }
            bail!(message)
        }
        Err(_) => bail!("Request failed ({}): {}", status, text),
    }
}

async fn register(api: &Api, username: String, password: String) -> Result<()> {
    let response = api
        .client
        .post(api.url("/auth/register"))
        .json(&serde_json::json!({ "username": username, "password": password }))
        .send()
        .await?;
    let result: UserResponse = check(response).await?.json().await?;

    println!("✅ Account created successfully!");
    println!("👤 Username: {}", result.user.username);
    println!("🆔 User ID: {}", result.user.id);
    println!("\n💡 You can now log in using: docvault login -u {} -p <password>", result.user.username);

    Ok(())
}

async fn login(api: &Api, username: String, password: String) -> Result<()> {
    let response = api
        .client
        .post(api.url("/auth/login"))
        .json(&serde_json::json!({ "username": username, "password": password }))
        .send()
        .await?;
    let result: LoginResponse = check(response).await?.json().await?;

    Session {
        token: result.token,
        username: result.user.username.clone(),
    }
    .save()?;

    println!("✅ Login successful!");
    println!("👤 Welcome back, {}!", result.user.username);

    Ok(())
}

async fn logout(api: &Api) -> Result<()> {
    if api.session.is_some() {
        let request = api.authed(api.client.post(api.url("/auth/logout")))?;
        if let Err(e) = request.send().await.map_err(anyhow::Error::from) {
            eprintln!("⚠️  Could not reach the server to end the session: {}", e);
        }
    }
    Session::clear()?;
    println!("✅ Logged out successfully!");
    Ok(())
}

async fn whoami(api: &Api) -> Result<()> {
    let response = api.authed(api.client.get(api.url("/auth/me")))?.send().await?;
    let result: UserResponse = check(response).await?.json().await?;

    println!("👤 Logged in as: {}", result.user.username);
    println!("🆔 User ID: {}", result.user.id);
    println!("🔑 Role: {:?}", result.user.role);
    Ok(())
}

struct ListFilters {
    status: Option<String>,
    document_type: Option<String>,
    search: Option<String>,
    sort_by: Option<String>,
    limit: usize,
}

/// Keeps a requested page inside `[1, pages]`.
fn clamp_page(requested: usize, pages: usize) -> usize {
    requested.clamp(1, pages.max(1))
}

async fn fetch_page(api: &Api, filters: &ListFilters, page: usize) -> Result<DocumentListResponse> {
    let mut query: Vec<(&str, String)> = vec![
        ("page", page.to_string()),
        ("limit", filters.limit.to_string()),
    ];
    let optional = [
        ("status", &filters.status),
        ("documentType", &filters.document_type),
        ("search", &filters.search),
        ("sortBy", &filters.sort_by),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            query.push((name, value.clone()));
        }
    }

    let request = api.authed(api.client.get(api.url("/documents")).query(&query))?;
    let response = check(request.send().await?).await?;
    Ok(response.json().await?)
}

async fn list_documents(api: &Api, filters: &ListFilters, page: usize) -> Result<()> {
    let requested = clamp_page(page, usize::MAX);
    let mut result = fetch_page(api, filters, requested).await?;

    let clamped = clamp_page(requested, result.pages);
    if clamped != requested {
        println!("ℹ️  Page {} is out of range, showing page {}", requested, clamped);
        result = fetch_page(api, filters, clamped).await?;
    }

    if result.documents.is_empty() {
        println!("📭 No documents found.");
        return Ok(());
    }

    print_documents(&result.documents);
    println!(
        "Page {} of {} · showing {} of {} documents",
        result.page,
        result.pages.max(1),
        result.count,
        result.total
    );
    if result.page < result.pages {
        println!("💡 Next page: --page {}", result.page + 1);
    }

    Ok(())
}

fn print_documents(documents: &[DocumentView]) {
    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("ID"),
        Cell::new("Title"),
        Cell::new("Type"),
        Cell::new("Status"),
        Cell::new("Expires"),
        Cell::new("File"),
    ]));

    for document in documents {
        let file = document
            .file
            .as_ref()
            .map(|f| f.original_name.clone())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(Row::new(vec![
            Cell::new(&document.id[..8.min(document.id.len())]),
            Cell::new(&document.title),
            Cell::new(document.document_type.as_str()),
            Cell::new(document.status.as_str()),
            Cell::new(&document.expiry_date.to_string()),
            Cell::new(&file),
        ]));
    }

    table.printstd();
    println!();
}

fn print_document(document: &DocumentView) {
    println!("📄 {}", document.title);
    println!("   🆔 ID: {}", document.id);
    println!("   🏷️  Type: {}", document.document_type);
    println!("   📌 Status: {}", document.status);
    if let Some(number) = &document.document_number {
        println!("   #️⃣  Number: {}", number);
    }
    if let Some(issuer) = &document.issuer {
        println!("   🏛️  Issuer: {}", issuer);
    }
    println!("   📅 Issued: {}  Expires: {}", document.issue_date, document.expiry_date);
    if let Some(file) = &document.file {
        println!("   📎 File: {} ({} bytes)", file.original_name, file.size);
    }
    if let Some(username) = &document.owner.username {
        println!("   👤 Owner: {}", username);
    }
    if let Some(notes) = &document.notes {
        println!("   📝 {}", notes);
    }
}

async fn show_document(api: &Api, id: &str) -> Result<()> {
    let request = api.authed(api.client.get(api.url(&format!("/documents/{id}"))))?;
    let result: DocumentResponse = check(request.send().await?).await?.json().await?;
    print_document(&result.document);
    Ok(())
}

async fn create_document(api: &Api, form: Form) -> Result<()> {
    let request = api.authed(api.client.post(api.url("/documents")).multipart(form))?;
    let result: DocumentResponse = check(request.send().await?).await?.json().await?;

    println!("✅ Document created successfully!");
    print_document(&result.document);
    Ok(())
}

async fn update_document(api: &Api, id: &str, form: Form) -> Result<()> {
    let request = api.authed(
        api.client
            .put(api.url(&format!("/documents/{id}")))
            .multipart(form),
    )?;
    let result: DocumentResponse = check(request.send().await?).await?.json().await?;

    println!("✅ Document updated successfully!");
    print_document(&result.document);
    Ok(())
}

async fn delete_document(api: &Api, id: &str) -> Result<()> {
    let request = api.authed(api.client.delete(api.url(&format!("/documents/{id}"))))?;
    let result: MessageResponse = check(request.send().await?).await?.json().await?;
    println!("✅ {}", result.message);
    Ok(())
}

/// Pulls the plain `filename="..."` value out of a Content-Disposition header.
fn attachment_name(disposition: &str) -> Option<String> {
    let start = disposition.find("filename=\"")? + "filename=\"".len();
    let rest = &disposition[start..];
    let end = rest.find('"')?;
    let name = Path::new(&rest[..end]).file_name()?.to_str()?;
    (!name.is_empty()).then(|| name.to_string())
}

async fn download_document(api: &Api, id: &str, output: Option<PathBuf>) -> Result<()> {
    let request = api.authed(
        api.client
            .get(api.url(&format!("/documents/download/{id}"))),
    )?;
    let response = check(request.send().await?).await?;

    let suggested = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(attachment_name);
    let target = output
        .or_else(|| suggested.map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(format!("{id}.bin")));

    let bytes = response.bytes().await?;
    fs::write(&target, &bytes)
        .with_context(|| format!("Failed to write {}", target.display()))?;

    println!("✅ Saved {} bytes to {}", bytes.len(), target.display());
    Ok(())
}

async fn dashboard(api: &Api) -> Result<()> {
    let request = api.authed(api.client.get(api.url("/analytics/dashboard")))?;
    let result: DashboardResponse = check(request.send().await?).await?.json().await?;
    let stats = &result.stats;

    let mut cards = Table::new();
    cards.add_row(Row::new(vec![
        Cell::new("Total"),
        Cell::new("Active"),
        Cell::new("Expiring Soon"),
        Cell::new("Expired"),
        Cell::new("Renewed"),
    ]));
    cards.add_row(Row::new(vec![
        Cell::new(&stats.total.to_string()),
        Cell::new(&stats.active.to_string()),
        Cell::new(&stats.expiring_soon.to_string()),
        Cell::new(&stats.expired.to_string()),
        Cell::new(&stats.renewed.to_string()),
    ]));

    println!("\n📊 Document Dashboard\n");
    cards.printstd();
    println!();

    if result.expiring_soon.is_empty() {
        println!("🎉 Nothing is expiring soon.");
    } else {
        println!("⏳ Expiring soon:");
        print_documents(&result.expiring_soon);
    }

    if !result.recent.is_empty() {
        println!("🆕 Recently added:");
        print_documents(&result.recent);
    }

    Ok(())
}

async fn expiring(api: &Api, days: Option<i64>) -> Result<()> {
    let mut request = api.client.get(api.url("/analytics/expiring"));
    if let Some(days) = days {
        request = request.query(&[("days", days)]);
    }
    let result: ExpiringResponse = check(api.authed(request)?.send().await?)
        .await?
        .json()
        .await?;

    if result.documents.is_empty() {
        println!("🎉 No documents expire in the next {} days.", result.days);
        return Ok(());
    }

    println!("\n⏳ {} document(s) expiring in the next {} days\n", result.count, result.days);
    print_documents(&result.documents);
    Ok(())
}
