//! Subcommand handlers. Each one builds a `User` for the identity it was
//! given and prints plain tab-separated lines.

use std::sync::Arc;

use almanac_core::{
  Directory, User,
  cache::MemoryCache,
  identity::UserRecord,
  resource::{Resource, ResourceRecord},
};
use almanac_store_sqlite::SqliteStore;
use anyhow::Context as _;

use crate::cli::{
  Command, GroupCommand, Identity, PrefCommand, ResourceCommand, ShareCommand, UserCommand,
};

pub type Dir = Directory<SqliteStore, Arc<MemoryCache>>;

pub async fn run(dir: &Dir, server: Option<&str>, command: Command) -> anyhow::Result<()> {
  let ctx = Context { dir, server };
  match command {
    Command::User(cmd) => ctx.user(cmd).await,
    Command::Resource(cmd) => ctx.resource(cmd).await,
    Command::Pref(cmd) => ctx.pref(cmd).await,
    Command::Share(cmd) => ctx.share(cmd).await,
    Command::Group(cmd) => ctx.group(cmd).await,
  }
}

struct Context<'a> {
  dir:    &'a Dir,
  server: Option<&'a str>,
}

impl Context<'_> {
  fn aggregate(&self, who: &Identity) -> User<SqliteStore, Arc<MemoryCache>> {
    self.dir.user_on(self.server, who.uid.as_deref(), who.email.as_deref())
  }

  fn store(&self) -> &SqliteStore { self.dir.store() }

  // ── user ──────────────────────────────────────────────────────────────

  async fn user(&self, cmd: UserCommand) -> anyhow::Result<()> {
    match cmd {
      UserCommand::Add { uid, fullname, email, aliases } => {
        let record = UserRecord {
          uid: Some(uid.clone()),
          fullname,
          email,
          email_list: aliases,
          ..Default::default()
        };
        self.store().put_user(&record).await.context("failed to store user")?;
        tracing::info!(uid = %uid, "user stored");
      }
      UserCommand::Show { who } => {
        let mut user = self.aggregate(&who);
        if !user.load(None).await? {
          anyhow::bail!("no such user");
        }
        let snapshot = serde_json::to_string_pretty(&user.snapshot())?;
        println!("{snapshot}");
      }
    }
    Ok(())
  }

  // ── resource ──────────────────────────────────────────────────────────

  async fn resource(&self, cmd: ResourceCommand) -> anyhow::Result<()> {
    match cmd {
      ResourceCommand::Add { who, kind, name, id } => {
        let mut user = self.aggregate(&who);
        match id {
          Some(id) => {
            let uid = user.uid().map(str::to_owned);
            let owner = match uid {
              Some(uid) => uid,
              None => {
                user.load(None).await?;
                user.uid().context("no such user")?.to_owned()
              }
            };
            let record = ResourceRecord::new(id, owner, name);
            user.save_resource(kind, &record).await?;
            println!("{}", record.id);
          }
          None => {
            let resource = user.create_resource(kind, &name).await?;
            println!("{}", resource.id());
          }
        }
      }
      ResourceCommand::Grant { kind, id, principal } => {
        self
          .store()
          .grant(kind, &id, &principal)
          .await
          .with_context(|| format!("failed to share {kind} {id}"))?;
        tracing::info!(%kind, id = %id, principal = %principal, "resource shared");
      }
      ResourceCommand::List { who, kind, shared } => {
        let mut user = self.aggregate(&who);
        let resources = if shared {
          user.shared_resources(kind).await?
        } else {
          user.owned_resources(kind).await?
        };
        for resource in resources.values() {
          print_resource(resource);
        }
      }
      ResourceCommand::Default { who, kind } => {
        let mut user = self.aggregate(&who);
        match user.default_resource(kind).await? {
          Some(resource) => print_resource(&resource),
          None => tracing::info!(%kind, "no default"),
        }
      }
      ResourceCommand::SetDefault { who, kind, id } => {
        let mut user = self.aggregate(&who);
        user.set_default_resource(kind, id).await?;
      }
      ResourceCommand::CreateDefault { who, kind, template } => {
        let mut user = self.aggregate(&who);
        user.create_default_resource(kind, template.as_deref()).await?;
        if let Some(resource) = user.default_resource(kind).await? {
          print_resource(&resource);
        }
      }
    }
    Ok(())
  }

  // ── pref ──────────────────────────────────────────────────────────────

  async fn pref(&self, cmd: PrefCommand) -> anyhow::Result<()> {
    match cmd {
      PrefCommand::Get { who, scope, name } => {
        let mut user = self.aggregate(&who);
        if let Some(value) = user.preference(scope, &name).await? {
          println!("{value}");
        }
      }
      PrefCommand::Set { who, scope, name, value } => {
        let mut user = self.aggregate(&who);
        user.save_preference(scope, &name, &value).await?;
      }
      PrefCommand::Delete { who, scope, name } => {
        let mut user = self.aggregate(&who);
        user.delete_preference(scope, &name).await?;
      }
    }
    Ok(())
  }

  // ── share ─────────────────────────────────────────────────────────────

  async fn share(&self, cmd: ShareCommand) -> anyhow::Result<()> {
    match cmd {
      ShareCommand::Grant { mailbox, principal, right } => {
        self
          .store()
          .share_mailbox(&mailbox, &principal, right)
          .await
          .with_context(|| format!("failed to share mailbox {mailbox}"))?;
        tracing::info!(mailbox = %mailbox, principal = %principal, right = ?right, "mailbox shared");
      }
      ShareCommand::List { who, tier } => {
        let mut user = self.aggregate(&who);
        for mailbox in user.shared_mailboxes(tier).await?.values() {
          println!("{}\t{}", mailbox.uid(), mailbox.fullname());
        }
      }
    }
    Ok(())
  }

  // ── group ─────────────────────────────────────────────────────────────

  async fn group(&self, cmd: GroupCommand) -> anyhow::Result<()> {
    match cmd {
      GroupCommand::Add { dn, fullname, email, owner, list } => {
        self
          .store()
          .put_group(&dn, &fullname, email.as_deref(), owner.as_deref(), list)
          .await
          .context("failed to store group")?;
      }
      GroupCommand::Member { dn, uid } => {
        self
          .store()
          .add_group_member(&dn, &uid)
          .await
          .with_context(|| format!("failed to add {uid} to {dn}"))?;
      }
      GroupCommand::List { who, query } => {
        let mut user = self.aggregate(&who);
        for group in user.groups(query).await?.values() {
          println!(
            "{}\t{}\t{}",
            group.dn(),
            group.fullname(),
            group.email().unwrap_or("-")
          );
        }
      }
    }
    Ok(())
  }
}

fn print_resource(resource: &Arc<Resource>) {
  println!("{}\t{}\t{}", resource.id(), resource.owner(), resource.name());
}
