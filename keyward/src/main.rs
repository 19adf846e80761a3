use std::path::Path;

use anyhow::{Context, Result, bail};
use keyward_proto::frame::{decode_frame, encode_frame};
use keyward_proto::message::{KeyConstraint, Request, Response};
use ssh_key::{PrivateKey, PublicKey};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use zeroize::Zeroizing;

#[tokio::main]
async fn main() -> Result<()> {
    // Reset SIGPIPE to default so piping output to `head` etc. exits cleanly
    // instead of panicking with "broken pipe".
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str).unwrap_or("help");

    match cmd {
        "list" | "-l" => cmd_list().await,
        "add" => cmd_add(&args[1..]).await,
        "remove" | "rm" => cmd_remove(&args[1..]).await,
        "remove-all" => cmd_remove_all().await,
        "add-token" => cmd_add_token(&args[1..]).await,
        "remove-token" => cmd_remove_token(&args[1..]).await,
        "lock" => cmd_lock().await,
        "unlock" => cmd_unlock().await,
        "status" => cmd_status().await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("unknown command: {other}");
            print_help();
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        "\
keyward - credential-custody agent CLI

The agent is reached via the socket named by KEYWARD_AUTH_SOCK.

USAGE:
    keyward <command> [args...]

COMMANDS:
    list                                List loaded identities (alias: -l)
    add [options] <keyfile>             Load a private key
      --lifetime <seconds>              Remove the key automatically after this long
      --confirm                         Ask before every use of the key
      --maxsign <n>                     Allow at most n signatures
      --provider <path>                 Authenticator middleware backing this key
    remove <keyfile>                    Unload one key (private or .pub file)
    remove-all                          Unload every key
    add-token <provider>                Load all keys from a token middleware module
    remove-token <provider>             Unload a token module and its keys
    lock                                Lock the agent with a password
    unlock                              Unlock the agent
    status                              Show agent reachability and key count
    help                                Show this help

EXAMPLES:
    keyward add ~/.ssh/id_ed25519
    keyward add --lifetime 3600 --confirm ~/.ssh/id_ed25519
    keyward add-token /usr/lib64/libykcs11.so
    keyward list"
    );
}

struct Client {
    stream: UnixStream,
    buf: Vec<u8>,
}

impl Client {
    async fn connect() -> Result<Self> {
        let Some(path) = std::env::var_os("KEYWARD_AUTH_SOCK") else {
            // Not an error in scripts probing for an agent.
            eprintln!("keyward: no agent available (KEYWARD_AUTH_SOCK is not set)");
            std::process::exit(2);
        };
        let stream = UnixStream::connect(&path)
            .await
            .with_context(|| format!("connecting to agent at {}", Path::new(&path).display()))?;
        Ok(Self {
            stream,
            buf: Vec::new(),
        })
    }

    async fn request(&mut self, request: &Request) -> Result<Response> {
        let (msg_type, payload) = request.encode()?;
        self.stream
            .write_all(&encode_frame(msg_type, &payload)?)
            .await?;
        self.stream.flush().await?;
        loop {
            if let Some((resp_type, body)) = decode_frame(&mut self.buf)? {
                return Ok(Response::decode(resp_type, &body)?);
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                bail!("agent closed the connection");
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

fn expect_success(response: Response, action: &str) -> Result<()> {
    match response {
        Response::Success => Ok(()),
        _ => bail!("agent refused to {action}"),
    }
}

async fn cmd_list() -> Result<()> {
    let mut client = Client::connect().await?;
    let response = client.request(&Request::RequestIdentities).await?;
    let Response::IdentitiesAnswer(entries) = response else {
        bail!("unexpected response to identity listing");
    };
    if entries.is_empty() {
        println!("The agent has no identities.");
        return Ok(());
    }
    for entry in &entries {
        match PublicKey::from_bytes(&entry.key_blob) {
            Ok(key) => println!(
                "{} {} {}",
                key.algorithm(),
                key.fingerprint(Default::default()),
                entry.comment
            ),
            Err(_) => println!("(unparseable key) {}", entry.comment),
        }
    }
    Ok(())
}

async fn cmd_add(args: &[String]) -> Result<()> {
    let mut lifetime: Option<u32> = None;
    let mut confirm = false;
    let mut maxsign: Option<u32> = None;
    let mut provider: Option<String> = None;
    let mut file: Option<&str> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--lifetime" => {
                lifetime = Some(flag_value(args, &mut i, "--lifetime")?.parse()?);
            }
            "--maxsign" => {
                maxsign = Some(flag_value(args, &mut i, "--maxsign")?.parse()?);
            }
            "--provider" => {
                provider = Some(flag_value(args, &mut i, "--provider")?.to_owned());
            }
            "--confirm" => confirm = true,
            other if other.starts_with('-') => bail!("unknown flag: {other}"),
            other => {
                if file.is_some() {
                    bail!("only one key file may be given");
                }
                file = Some(other);
            }
        }
        i += 1;
    }
    let Some(file) = file else {
        bail!("usage: keyward add [options] <keyfile>");
    };

    let contents = Zeroizing::new(
        std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?,
    );
    let mut key =
        PrivateKey::from_openssh(contents.as_str()).with_context(|| format!("parsing {file}"))?;
    if key.is_encrypted() {
        let passphrase =
            Zeroizing::new(rpassword::prompt_password(format!("Enter passphrase for {file}: "))?);
        key = key
            .decrypt(passphrase.as_bytes())
            .context("incorrect passphrase")?;
    }
    if key.comment().is_empty() {
        key.set_comment(file);
    }

    let mut constraints = Vec::new();
    if let Some(seconds) = lifetime {
        constraints.push(KeyConstraint::Lifetime(seconds));
    }
    if confirm {
        constraints.push(KeyConstraint::Confirm);
    }
    if let Some(n) = maxsign {
        constraints.push(KeyConstraint::MaxSignatures(n));
    }
    if let Some(path) = provider {
        constraints.push(KeyConstraint::Provider(path));
    }

    let comment = key.comment().to_owned();
    let mut client = Client::connect().await?;
    let response = client
        .request(&Request::AddIdentity {
            key: Box::new(key),
            constraints,
        })
        .await?;
    expect_success(response, "add the identity")?;
    println!("Identity added: {comment}");
    Ok(())
}

/// Load a public key from a `.pub` file, or derive it from a private key
/// file if that is what was given.
fn public_key_from_file(file: &str) -> Result<PublicKey> {
    let contents = Zeroizing::new(
        std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?,
    );
    if let Ok(key) = PublicKey::from_openssh(contents.as_str()) {
        return Ok(key);
    }
    let key =
        PrivateKey::from_openssh(contents.as_str()).with_context(|| format!("parsing {file}"))?;
    Ok(key.public_key().clone())
}

async fn cmd_remove(args: &[String]) -> Result<()> {
    let Some(file) = args.first() else {
        bail!("usage: keyward remove <keyfile>");
    };
    let key = public_key_from_file(file)?;
    let mut client = Client::connect().await?;
    let response = client
        .request(&Request::RemoveIdentity {
            key_blob: key.to_bytes()?,
        })
        .await?;
    expect_success(response, "remove the identity")?;
    println!("Identity removed: {}", key.fingerprint(Default::default()));
    Ok(())
}

async fn cmd_remove_all() -> Result<()> {
    let mut client = Client::connect().await?;
    let response = client.request(&Request::RemoveAllIdentities).await?;
    expect_success(response, "remove all identities")?;
    println!("All identities removed.");
    Ok(())
}

async fn cmd_add_token(args: &[String]) -> Result<()> {
    let Some(provider) = args.first() else {
        bail!("usage: keyward add-token <provider>");
    };
    let pin = Zeroizing::new(
        rpassword::prompt_password(format!("Enter PIN for {provider}: "))?.into_bytes(),
    );
    let mut client = Client::connect().await?;
    let response = client
        .request(&Request::AddTokenKey {
            provider: provider.clone(),
            pin,
            constraints: Vec::new(),
        })
        .await?;
    let Response::IdentitiesAnswer(entries) = response else {
        bail!("agent refused to load the token module");
    };
    println!("Loaded {} key(s) from {provider}:", entries.len());
    for entry in &entries {
        match PublicKey::from_bytes(&entry.key_blob) {
            Ok(key) => println!(
                "  {} {}",
                key.fingerprint(Default::default()),
                entry.comment
            ),
            Err(_) => println!("  (unparseable key) {}", entry.comment),
        }
    }
    Ok(())
}

async fn cmd_remove_token(args: &[String]) -> Result<()> {
    let Some(provider) = args.first() else {
        bail!("usage: keyward remove-token <provider>");
    };
    let mut client = Client::connect().await?;
    let response = client
        .request(&Request::RemoveTokenKey {
            provider: provider.clone(),
        })
        .await?;
    expect_success(response, "unload the token module")?;
    println!("Token module unloaded: {provider}");
    Ok(())
}

async fn cmd_lock() -> Result<()> {
    let password = Zeroizing::new(rpassword::prompt_password("Enter lock password: ")?);
    let again = Zeroizing::new(rpassword::prompt_password("Again: ")?);
    if *password != *again {
        bail!("passwords do not match");
    }
    let mut client = Client::connect().await?;
    let response = client
        .request(&Request::Lock {
            password: Zeroizing::new(password.as_bytes().to_vec()),
        })
        .await?;
    expect_success(response, "lock")?;
    println!("Agent locked.");
    Ok(())
}

async fn cmd_unlock() -> Result<()> {
    let password = Zeroizing::new(rpassword::prompt_password("Enter unlock password: ")?);
    let mut client = Client::connect().await?;
    let response = client
        .request(&Request::Unlock {
            password: Zeroizing::new(password.as_bytes().to_vec()),
        })
        .await?;
    expect_success(response, "unlock")?;
    println!("Agent unlocked.");
    Ok(())
}

async fn cmd_status() -> Result<()> {
    let mut client = Client::connect().await?;
    let response = client.request(&Request::RequestIdentities).await?;
    let Response::IdentitiesAnswer(entries) = response else {
        bail!("unexpected response to identity listing");
    };
    // A locked agent answers with an empty list, indistinguishable from an
    // empty one by design.
    println!("Agent reachable, {} identit{} listed.", entries.len(),
        if entries.len() == 1 { "y" } else { "ies" });
    Ok(())
}

fn flag_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .with_context(|| format!("{flag} requires a value"))
}
