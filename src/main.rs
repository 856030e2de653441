use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};

use carwash_client::app::{App, CheckoutPlan};
use carwash_client::settings::Settings;
use carwash_client::PaymentOutcome;

#[derive(Parser)]
#[command(name = "carwash-client", about = "Booking chat and checkout client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chat with the provider assigned to a booking request.
    Chat {
        #[arg(long)]
        request_id: i64,
    },
    /// List time slots offered by a provider.
    Slots {
        #[arg(long)]
        brand_id: i64,
    },
    /// Lock a slot and pay for a cart item.
    Checkout {
        #[arg(long)]
        invoice_id: i64,
        #[arg(long)]
        slot_id: i64,
        #[arg(long)]
        address_id: i64,
        #[arg(long)]
        car_id: i64,
        #[arg(long)]
        discount_code: Option<String>,
        #[arg(long)]
        payment_method_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    info!("starting carwash-client");

    let config = Settings::load()?;
    let app = App::new(config)?;

    tokio::select! {
        result = run(&app, cli.command) => {
            if let Err(err) = result {
                error!(?err, "command failed");
                return Err(err);
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

async fn run(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Chat { request_id } => app.run_chat(request_id).await,
        Command::Slots { brand_id } => app.list_slots(brand_id).await,
        Command::Checkout {
            invoice_id,
            slot_id,
            address_id,
            car_id,
            discount_code,
            payment_method_id,
        } => {
            let outcome = app
                .run_checkout(CheckoutPlan {
                    invoice_id,
                    slot_id,
                    address_id,
                    car_id,
                    discount_code,
                    payment_method_id,
                })
                .await?;
            match outcome {
                PaymentOutcome::Redirect(url) => println!("Continue payment at {url}"),
                PaymentOutcome::ShowOrders => println!("Payment complete. See your orders."),
            }
            Ok(())
        }
    }
}
