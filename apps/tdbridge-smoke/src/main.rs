use std::{env, process, sync::Arc, time::Duration};

use serde_json::json;
use tdbridge_client::{
    AuthorizationState, Client, ClientConfig, ClientError, ConfigError, SimulatedAccount,
    SimulatedEngine, StdinPrompt, UpdateHandler,
};
use tdbridge_core::NEW_MESSAGE_UPDATE;

mod logging;

const DEMO_PHONE: &str = "+15550100";
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

fn main() {
    logging::init();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(ConfigError::Missing { key }) => {
            tracing::warn!(key, "configuration incomplete; using demo credentials");
            ClientConfig::new(1, "demo-api-hash", "demo-encryption-key")
        }
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            process::exit(2);
        }
    };

    if let Err(err) = run(config) {
        eprintln!("Smoke run failed: {err}");
        process::exit(1);
    }
}

fn run(mut config: ClientConfig) -> Result<(), ClientError> {
    if config.phone.is_none() && config.bot_token.is_none() {
        config.phone = Some(DEMO_PHONE.to_owned());
    }

    let code = env::var("TDBRIDGE_SMOKE_CODE").unwrap_or_else(|_| "12345".to_owned());
    let password = env::var("TDBRIDGE_SMOKE_PASSWORD").ok();
    let mut account = SimulatedAccount::new(code.clone());
    if let Some(password) = &password {
        account = account.with_password(password.clone());
    }

    let engine = Arc::new(SimulatedEngine::new(account));
    let client = Client::with_prompt(config, Arc::clone(&engine), StdinPrompt)?;

    client.add_message_handler(UpdateHandler::new(|update| {
        let text = &update["message"]["content"]["text"]["text"];
        println!("New message: {text}");
    }));

    loop {
        match client.login(false)? {
            AuthorizationState::Ready => break,
            AuthorizationState::WaitCode => {
                client.send_code(&code)?;
            }
            AuthorizationState::WaitPassword => {
                client.send_password(password.as_deref().unwrap_or_default())?;
            }
            AuthorizationState::WaitRegistration => {
                client.register_user("Smoke", "Test")?;
            }
            other => {
                return Err(ClientError::invalid_state(other, "smoke login"));
            }
        }
    }

    let me = client.get_me()?.wait_ok(Some(REPLY_TIMEOUT))?;
    println!("Logged in as {} (id {})", me["first_name"], me["id"]);

    engine.inject(json!({
        "@type": NEW_MESSAGE_UPDATE,
        "message": {
            "id": 1,
            "chat_id": 42,
            "content": {
                "@type": "messageText",
                "text": {"@type": "formattedText", "text": "hello from the simulated engine"},
            },
        },
    }));
    std::thread::sleep(Duration::from_millis(200));

    client.stop();
    Ok(())
}
