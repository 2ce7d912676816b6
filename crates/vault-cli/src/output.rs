//! Terminal output helpers

use vault_core::Credential;

pub fn success(msg: &str) {
    println!("✓ {}", msg);
}

pub fn error(msg: &str) {
    eprintln!("✗ {}", msg);
}

pub fn warning(msg: &str) {
    eprintln!("! {}", msg);
}

pub fn info(msg: &str) {
    println!("  {}", msg);
}

/// Short id shown in listings; any unique prefix is accepted back
pub fn short_id(credential: &Credential) -> String {
    credential.id.simple().to_string()[..8].to_string()
}

pub fn print_credentials(credentials: &[Credential]) {
    if credentials.is_empty() {
        info("No credentials found.");
        return;
    }

    let title_width = credentials
        .iter()
        .map(|c| c.title.chars().count())
        .max()
        .unwrap_or(0)
        .max("TITLE".len());
    let user_width = credentials
        .iter()
        .map(|c| c.username.chars().count())
        .max()
        .unwrap_or(0)
        .max("USERNAME".len());

    println!(
        "{:<8}  {:<tw$}  {:<uw$}  CATEGORY",
        "ID",
        "TITLE",
        "USERNAME",
        tw = title_width,
        uw = user_width
    );
    for c in credentials {
        println!(
            "{:<8}  {:<tw$}  {:<uw$}  {}",
            short_id(c),
            c.title,
            c.username,
            c.category,
            tw = title_width,
            uw = user_width
        );
    }
}

pub fn print_credential(credential: &Credential, reveal: bool) {
    let password = if reveal {
        credential.password.clone()
    } else {
        "*".repeat(8)
    };

    println!("ID:       {}", credential.id);
    println!("Title:    {}", credential.title);
    println!("Username: {}", credential.username);
    println!("Password: {}", password);
    if let Some(url) = &credential.url {
        println!("URL:      {}", url);
    }
    println!("Category: {}", credential.category);
    if let Some(notes) = &credential.notes {
        println!("Notes:    {}", notes);
    }
    println!(
        "Created:  {}",
        credential.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "Updated:  {}",
        credential.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
}
