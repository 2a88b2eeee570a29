use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::path::PathBuf;

use sgn::api::{endpoint, param};
use sgn::autofill::{AutoFill, Filled, Relations};
use sgn::client::ShopGunClient;
use sgn::config::Config;
use sgn::request::{Filter, ListRequest, Order, Parameter};

#[derive(Parser, Debug)]
#[command(name = "sgn")]
#[command(about = "Query offers, catalogs, dealers and stores from the ShopGun API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/sgn/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Log debug output to the log file
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List or search offers
  Offers {
    /// Free text search
    #[arg(short, long)]
    query: Option<String>,
    /// Only offers from these dealers
    #[arg(long = "dealer")]
    dealers: Vec<String>,
    /// Only offers from these catalogs
    #[arg(long = "catalog")]
    catalogs: Vec<String>,
    #[arg(long, default_value_t = 25)]
    limit: u32,
    #[arg(long, default_value_t = 0)]
    offset: u32,
    /// Include the referenced dealers, stores and catalogs
    #[arg(long)]
    fill: bool,
  },
  /// Show one or more catalogs
  Catalog {
    #[arg(required = true)]
    ids: Vec<String>,
    /// Include page images
    #[arg(long)]
    pages: bool,
    /// Include hotspots
    #[arg(long)]
    hotspots: bool,
    /// Include dealer and store
    #[arg(long)]
    fill: bool,
  },
  /// List dealers
  Dealers {
    /// Dealer ids (all dealers when empty)
    ids: Vec<String>,
    #[arg(long, default_value_t = 25)]
    limit: u32,
  },
  /// List stores
  Stores {
    #[arg(long = "dealer")]
    dealers: Vec<String>,
    #[arg(long, default_value_t = 25)]
    limit: u32,
    /// Include the dealers
    #[arg(long)]
    fill: bool,
  },
}

#[derive(Serialize)]
struct Output<'a, T> {
  data: &'a T,
  #[serde(skip_serializing_if = "no_relations")]
  relations: &'a Relations,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  errors: Vec<String>,
}

fn no_relations(relations: &&Relations) -> bool {
  relations.is_empty()
}

fn print_filled<T: Serialize>(filled: &Filled<T>) -> Result<()> {
  let output = Output {
    data: &filled.data,
    relations: &filled.relations,
    errors: filled.errors.iter().map(ToString::to_string).collect(),
  };
  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = sgn::logging::init(args.verbose)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let client = ShopGunClient::new(&config)?;

  let result = run(&client, args.command).await;
  client.shutdown();
  result
}

async fn run(client: &ShopGunClient, command: Command) -> Result<()> {
  match command {
    Command::Offers {
      query,
      dealers,
      catalogs,
      limit,
      offset,
      fill,
    } => {
      let mut parameter = Parameter::new().limit(limit).offset(offset);
      let url = match &query {
        Some(q) => {
          parameter = parameter.set(param::QUERY, q);
          endpoint::OFFER_SEARCH
        }
        None => endpoint::OFFER_LIST,
      };
      let auto_fill = if fill {
        AutoFill::new().dealer(true).store(true).catalog(true)
      } else {
        AutoFill::new()
      };
      let list = ListRequest::new(url)
        .filter(Filter::new().dealers(dealers).catalogs(catalogs))
        .order(if query.is_some() { Order::new() } else { Order::by_popularity() })
        .parameter(parameter)
        .auto_fill(auto_fill);

      let filled = client.list_offers(&list).await?;
      print_filled(&filled)
    }
    Command::Catalog {
      ids,
      pages,
      hotspots,
      fill,
    } => {
      let auto_fill = AutoFill::new()
        .pages(pages)
        .hotspots(hotspots)
        .dealer(fill)
        .store(fill);
      let results =
        futures::future::join_all(ids.iter().map(|id| client.get_catalog(id, auto_fill))).await;

      for (id, result) in ids.iter().zip(results) {
        let filled = result.map_err(|e| eyre!("Failed to get catalog {}: {}", id, e))?;
        print_filled(&filled)?;
      }
      Ok(())
    }
    Command::Dealers { ids, limit } => {
      let list = ListRequest::new(endpoint::DEALER_LIST)
        .filter(Filter::new().dealers(ids))
        .parameter(Parameter::new().limit(limit));
      let dealers = client.list_dealers(&list).await?;
      println!("{}", serde_json::to_string_pretty(&dealers)?);
      Ok(())
    }
    Command::Stores {
      dealers,
      limit,
      fill,
    } => {
      let list = ListRequest::new(endpoint::STORE_LIST)
        .filter(Filter::new().dealers(dealers))
        .parameter(Parameter::new().limit(limit))
        .auto_fill(AutoFill::new().dealer(fill));
      let filled = client.list_stores(&list).await?;
      print_filled(&filled)
    }
  }
}
