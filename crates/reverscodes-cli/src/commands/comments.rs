use std::time::Duration;

use clap::Subcommand;
use reverscodes_core::comments::thread;
use reverscodes_core::{CommentClient, Config, NewComment};
use url::Url;

#[derive(Subcommand)]
pub enum CommentsAction {
    /// List the latest comments, threaded
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Override the configured endpoint
        #[arg(long)]
        endpoint: Option<Url>,
    },
    /// Post a comment
    Post {
        /// Display name (2-20 characters)
        #[arg(short, long)]
        nickname: String,
        /// Comment text (5-500 characters)
        text: String,
        /// Reply to this comment ID
        #[arg(long)]
        reply_to: Option<String>,
        #[arg(long)]
        endpoint: Option<Url>,
    },
    /// Delete a comment (admin)
    Delete {
        /// Comment ID
        id: String,
        /// Admin password
        #[arg(long)]
        password: String,
        #[arg(long)]
        endpoint: Option<Url>,
    },
}

pub fn run(action: CommentsAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let runtime = tokio::runtime::Runtime::new()?;

    match action {
        CommentsAction::List { json, endpoint } => {
            let client = client(&config, endpoint)?;
            let comments = runtime.block_on(client.list())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&comments)?);
                return Ok(());
            }
            if comments.is_empty() {
                println!("No comments yet.");
            }
            for t in thread(comments) {
                println!(
                    "[{}] {} ({}): {}",
                    t.comment.id,
                    t.comment.nickname,
                    t.comment.timestamp.format("%Y-%m-%d %H:%M"),
                    t.comment.text
                );
                for reply in &t.replies {
                    println!("    [{}] {}: {}", reply.id, reply.nickname, reply.text);
                }
            }
        }
        CommentsAction::Post {
            nickname,
            text,
            reply_to,
            endpoint,
        } => {
            let mut new = NewComment::new(&nickname, &text)?;
            if let Some(parent) = reply_to {
                new = new.reply_to(parent);
            }
            let client = client(&config, endpoint)?;
            let created = runtime.block_on(client.create(&new))?;
            println!("Comment posted: {}", created.id);
        }
        CommentsAction::Delete {
            id,
            password,
            endpoint,
        } => {
            let client = client(&config, endpoint)?;
            runtime.block_on(client.delete(&id, &password))?;
            println!("Comment deleted: {id}");
        }
    }
    Ok(())
}

fn client(
    config: &Config,
    endpoint: Option<Url>,
) -> Result<CommentClient, Box<dyn std::error::Error>> {
    let client = match endpoint {
        Some(url) => CommentClient::new(url, Duration::from_millis(config.comments.timeout_ms))?,
        None => CommentClient::from_config(&config.comments)?,
    };
    tracing::debug!(endpoint = %client.endpoint(), "using comment store");
    Ok(client)
}
