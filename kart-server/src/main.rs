use env_logger::Env;
use log::error;

use kart_core::GLOBAL_CONFIG;

mod error;
mod game;
mod network;
mod physics;
mod session;
mod spawn;
mod vehicle;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    // accept connections in the background, then kick off the game loop
    let addr = format!("0.0.0.0:{}", GLOBAL_CONFIG.port);
    let events = match network::listen(&addr) {
        Ok(events) => events,
        Err(err) => {
            error!("{}", err);
            std::process::exit(1);
        }
    };
    game::GameServer::new(events).start_loop();
}
