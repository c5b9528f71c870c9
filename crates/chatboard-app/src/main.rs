//! Terminal client entry point.

use std::error::Error;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use chatboard_app::command::HELP;
use chatboard_app::render::{message_line, state_label, typing_line};
use chatboard_app::{Command, parse_command};
use chatboard_core::protocol::Tool;
use chatboard_core::whiteboard::PALETTE;
use chatboard_core::upload::{AttachmentUploader, HttpUploader, VoiceClip};
use chatboard_core::{ChatClient, ClientConfig, ConnectionState, NativeWebSocket};
use clap::Parser;

/// Longest the loop waits for input before ticking the client.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(name = "chatboard", about = "Realtime chat and whiteboard client")]
struct Args {
    /// Name to join the chat as.
    username: String,

    /// JSON config file.
    #[arg(long, env = "CHATBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Server host, overrides the config file.
    #[arg(long)]
    host: Option<String>,

    /// Use wss/https on the secure port.
    #[arg(long)]
    secure: bool,
}

struct Shell {
    client: ChatClient<NativeWebSocket>,
    uploader: HttpUploader,
    printed: usize,
    last_error: Option<String>,
    last_typing: Option<String>,
    last_state: ConnectionState,
}

impl Shell {
    fn new(config: ClientConfig) -> Self {
        let uploader = HttpUploader::from_config(&config);
        Self {
            client: ChatClient::new(config, NativeWebSocket::new()),
            uploader,
            printed: 0,
            last_error: None,
            last_typing: None,
            last_state: ConnectionState::Disconnected,
        }
    }

    /// Print whatever changed since the last call.
    fn render(&mut self) {
        let state = self.client.state();
        if state != self.last_state {
            match self.client.retry_in(Instant::now()) {
                Some(wait) => println!("-- {} in {:.1}s", state_label(state), wait.as_secs_f64()),
                None => println!("-- {}", state_label(state)),
            }
            self.last_state = state;
        }

        let messages = self.client.chat().messages();
        if messages.len() < self.printed {
            self.printed = 0;
        }
        for msg in &messages[self.printed..] {
            println!("{}", message_line(msg));
        }
        self.printed = messages.len();

        let typing = typing_line(self.client.chat().typing());
        if typing != self.last_typing {
            if let Some(line) = &typing {
                println!("   {}", line);
            }
            self.last_typing = typing;
        }

        let error = self.client.chat().error().map(str::to_string);
        if error != self.last_error {
            if let Some(text) = &error {
                eprintln!("!! {}", text);
            }
            self.last_error = error;
        }
    }

    /// Handle one input line. Returns false to quit.
    fn handle_line(&mut self, line: &str, now: Instant) -> bool {
        let command = match parse_command(line) {
            Ok(Some(command)) => command,
            Ok(None) => return true,
            Err(e) => {
                eprintln!("{}", e);
                return true;
            }
        };

        match command {
            Command::Say(text) => {
                self.client.input_changed(&text, now);
                if let Err(e) = self.client.send_message(&text) {
                    log::debug!("Message not sent: {}", e);
                }
            }
            Command::Draw(points) => {
                let mut points = points.into_iter();
                if let Some(first) = points.next() {
                    self.client.pointer_down(first);
                    for point in points {
                        self.client.pointer_move(point);
                    }
                    self.client.pointer_up();
                }
            }
            Command::Pen => self.client.whiteboard_mut().set_tool(Tool::Pen),
            Command::Eraser => self.client.whiteboard_mut().set_tool(Tool::Eraser),
            Command::Color(color) => self.client.whiteboard_mut().set_color(color),
            Command::Palette => {
                for (slot, color) in PALETTE.iter().enumerate() {
                    println!("  {} {}", slot + 1, color);
                }
            }
            Command::Width(width) => self.client.whiteboard_mut().set_width(width),
            Command::Clear => self.client.clear_whiteboard(),
            Command::Export(path) => match self.client.whiteboard().surface().save_png(&path) {
                Ok(()) => println!("Saved {}", path.display()),
                Err(e) => eprintln!("Export failed: {}", e),
            },
            Command::Upload(path) => self.upload(&path, None),
            Command::Voice { path, duration } => self.upload(&path, Some(duration)),
            Command::Users => {
                let users = self.client.chat().users();
                println!("Online ({}): {}", users.len(), users.join(", "));
            }
            Command::Reconnect => match self.client.identity().map(str::to_string) {
                Some(username) => self.client.connect(&username, now),
                None => eprintln!("Not joined yet"),
            },
            Command::Help => println!("{}", HELP),
            Command::Quit => return false,
        }
        true
    }

    fn upload(&self, path: &std::path::Path, voice: Option<Duration>) {
        let Some(username) = self.client.identity() else {
            eprintln!("Not joined yet");
            return;
        };

        let result = match voice {
            None => self.uploader.upload_path(username, path),
            Some(duration) => VoiceClip::from_recording(path, duration)
                .and_then(|clip| self.uploader.upload_voice(username, clip)),
        };

        match result {
            Ok(receipt) => println!("{}: {}", receipt.message, receipt.filename),
            Err(e) => eprintln!("{}", e),
        }
    }
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(host) = args.host {
        config = config.with_host(host);
    }
    if args.secure {
        config = config.with_secure(true);
    }

    log::info!("Starting Chatboard client");
    println!("Joining {} as {}. Type /help for commands.", config.realtime_url(), args.username);

    let mut shell = Shell::new(config);
    shell.client.connect(&args.username, Instant::now());
    let input = spawn_stdin_reader();

    loop {
        shell.client.tick(Instant::now());
        shell.render();

        match input.recv_timeout(POLL_INTERVAL) {
            Ok(line) => {
                if !shell.handle_line(&line, Instant::now()) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    shell.client.disconnect(Instant::now());
    log::info!("Bye");
    Ok(())
}
