use chromepilot_tools::browser::{find_profile_dir_by_email, ChromeChannel};

pub fn run(email: &str, channel: &str) -> anyhow::Result<()> {
    let channel: ChromeChannel = channel.parse()?;
    match find_profile_dir_by_email(email, channel) {
        Some(location) => {
            println!("{}", serde_json::to_string_pretty(&location)?);
            Ok(())
        }
        None => anyhow::bail!("no {} profile signed in as {}", channel, email),
    }
}
