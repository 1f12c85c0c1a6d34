//!
//! techmarket CLI binary
//! ----------------------
//! Interactive client for a running techmarket server. Owns the single
//! client session for the process: it hydrates from the persisted token
//! slot on startup, runs login/register/logout commands through the session
//! manager, and surfaces the expiry warning and forced-logout notices the
//! session timers produce.

use std::env;
use std::io::{self, Write};

use anyhow::Result;

use techmarket::client::{ApiClient, ClientSession, TokenSlot};
use techmarket::storage::{ListingUpdate, NewListing};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--server <url>]\n\nFlags:\n  --server <url>   Server base URL (env: TECHMARKET_SERVER, default http://127.0.0.1:4000)\n\nEnvironment:\n  TECHMARKET_STATE_DIR      Directory holding the persisted token slot\n  TECHMARKET_WARNING_SECS   Seconds before expiry to warn (default 10)\n\nInteractive commands:\n  register <email> <password> [name...]   create an account and sign in\n  login <email> <password>                sign in\n  logout                                  sign out\n  whoami                                  show the signed-in user\n  listings [category]                     browse listings\n  show <id>                               show one listing\n  create <price_cents> <category> <title...>   create a listing (signed in)\n  retitle <id> <title...>                 rename an owned listing\n  reprice <id> <price_cents>              reprice an owned listing\n  delete <id>                             delete an owned listing\n  status                                  session status\n  help                                    show this help\n  quit | exit                             exit"
    );
}

fn parse_string_arg(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag {
            if i + 1 < args.len() {
                return Some(args[i + 1].clone());
            }
            return None;
        }
        i += 1;
    }
    None
}

/// Print any pending session messages (expiry warning, forced logout) so
/// timer-driven transitions are visible between commands.
fn print_session_messages(session: &ClientSession<ApiClient>) {
    if let Some(n) = session.notice() {
        println!("! {}", n);
    }
    if let Some(e) = session.error() {
        println!("! {}", e);
    }
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage("techmarket_cli");
        return Ok(());
    }

    let base = parse_string_arg(&args, "--server")
        .or_else(|| env::var("TECHMARKET_SERVER").ok())
        .unwrap_or_else(|| "http://127.0.0.1:4000".to_string());

    let warning_window = env::var("TECHMARKET_WARNING_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(std::time::Duration::from_secs)
        .unwrap_or(std::time::Duration::from_secs(techmarket::client::DEFAULT_WARNING_SECS));

    let rt = tokio::runtime::Runtime::new()?;
    let api = ApiClient::new(&base)?;
    let session = rt.block_on(async {
        let s = ClientSession::with_warning_window(
            ApiClient::new(&base)?,
            TokenSlot::new(TokenSlot::default_path()),
            warning_window,
        );
        s.hydrate().await;
        Ok::<_, anyhow::Error>(s)
    })?;

    println!("techmarket-cli connected to {}. Type 'help' for commands.", base);
    if let Some(user) = session.user() {
        println!("signed in as {}", user.email);
    }
    print_session_messages(&session);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut input = String::new();
    loop {
        input.clear();
        print!("> ");
        let _ = stdout.flush();
        if stdin.read_line(&mut input).is_err() {
            break;
        }
        if input.is_empty() {
            // EOF
            break;
        }
        let line = input.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        let cmd = parts[0].to_lowercase();

        match cmd.as_str() {
            "quit" | "exit" => break,
            "help" => print_usage("techmarket_cli"),
            "status" => {
                let snap = session.snapshot();
                match snap.user {
                    Some(u) => println!("signed in as {} (id {})", u.email, u.id),
                    None => println!("signed out"),
                }
                if snap.hydrating {
                    println!("session is still hydrating");
                }
            }
            "whoami" => match session.user() {
                Some(u) => {
                    let name = u.name.as_deref().unwrap_or("-");
                    println!("id: {}\nemail: {}\nname: {}", u.id, u.email, name);
                }
                None => println!("not signed in"),
            },
            "register" => {
                if parts.len() < 3 {
                    eprintln!("usage: register <email> <password> [name...]");
                    continue;
                }
                let name = if parts.len() > 3 { Some(parts[3..].join(" ")) } else { None };
                match rt.block_on(session.register(name.as_deref(), parts[1], parts[2])) {
                    Ok(u) => println!("registered and signed in as {}", u.email),
                    Err(e) => eprintln!("register failed: {}", e),
                }
            }
            "login" => {
                if parts.len() != 3 {
                    eprintln!("usage: login <email> <password>");
                    continue;
                }
                match rt.block_on(session.login(parts[1], parts[2])) {
                    Ok(u) => println!("signed in as {}", u.email),
                    Err(e) => eprintln!("login failed: {}", e),
                }
            }
            "logout" => {
                session.logout(None);
                println!("signed out");
            }
            "listings" => {
                let category = parts.get(1).copied();
                match rt.block_on(api.list_listings(category)) {
                    Ok(listings) if listings.is_empty() => println!("no listings"),
                    Ok(listings) => {
                        for l in listings {
                            println!(
                                "#{:<5} {:>10}  {}  [{}]",
                                l.id,
                                format!("${:.2}", l.price_cents as f64 / 100.0),
                                l.title,
                                l.category.as_deref().unwrap_or("-")
                            );
                        }
                    }
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            "show" => {
                let Some(id) = parts.get(1).and_then(|s| s.parse::<i64>().ok()) else {
                    eprintln!("usage: show <id>");
                    continue;
                };
                match rt.block_on(api.get_listing(id)) {
                    Ok(l) => println!("{}", serde_json::to_string_pretty(&l)?),
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            "create" => {
                if parts.len() < 4 {
                    eprintln!("usage: create <price_cents> <category> <title...>");
                    continue;
                }
                let Some(token) = session.token() else {
                    eprintln!("sign in first");
                    continue;
                };
                let Ok(price_cents) = parts[1].parse::<i64>() else {
                    eprintln!("price_cents must be an integer");
                    continue;
                };
                let new = NewListing {
                    title: parts[3..].join(" "),
                    price_cents,
                    condition: None,
                    category: Some(parts[2].to_string()),
                    brand: None,
                    image_url: None,
                };
                match rt.block_on(api.create_listing(&token, &new)) {
                    Ok(l) => println!("created listing #{}", l.id),
                    Err(e) => eprintln!("create failed: {}", e),
                }
            }
            "retitle" | "reprice" => {
                if parts.len() < 3 {
                    eprintln!("usage: {} <id> <value>", cmd);
                    continue;
                }
                let Some(token) = session.token() else {
                    eprintln!("sign in first");
                    continue;
                };
                let Some(id) = parts[1].parse::<i64>().ok() else {
                    eprintln!("bad id");
                    continue;
                };
                let mut changes = ListingUpdate::default();
                if cmd == "retitle" {
                    changes.title = Some(parts[2..].join(" "));
                } else {
                    let Ok(price) = parts[2].parse::<i64>() else {
                        eprintln!("price_cents must be an integer");
                        continue;
                    };
                    changes.price_cents = Some(price);
                }
                match rt.block_on(api.update_listing(&token, id, &changes)) {
                    Ok(l) => println!("updated listing #{}", l.id),
                    Err(e) => eprintln!("update failed: {}", e),
                }
            }
            "delete" => {
                let Some(id) = parts.get(1).and_then(|s| s.parse::<i64>().ok()) else {
                    eprintln!("usage: delete <id>");
                    continue;
                };
                let Some(token) = session.token() else {
                    eprintln!("sign in first");
                    continue;
                };
                match rt.block_on(api.delete_listing(&token, id)) {
                    Ok(()) => println!("deleted listing #{}", id),
                    Err(e) => eprintln!("delete failed: {}", e),
                }
            }
            other => eprintln!("unknown command: {} (try 'help')", other),
        }

        print_session_messages(&session);
    }

    Ok(())
}
