/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Anything that is not a command is sent to the agent as a message.
    Text(String),
    Mute,
    Stop,
    Start(Option<String>),
    References,
    Help,
    Quit,
    Empty,
}

pub const HELP: &str = "\
commands:
  /start [reference]  start a session, optionally seeded with a reference document
  /stop               end the session
  /mute               toggle the microphone
  /references         list available reference documents
  /quit               exit
anything else is sent to the agent as a text message";

pub fn parse_command(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Text(line.to_string());
    };

    let (name, argument) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, Some(rest.trim()).filter(|rest| !rest.is_empty())),
        None => (command, None),
    };
    match name {
        "start" => Input::Start(argument.map(str::to_string)),
        "stop" => Input::Stop,
        "mute" => Input::Mute,
        "references" | "refs" => Input::References,
        "help" | "?" => Input::Help,
        "quit" | "exit" => Input::Quit,
        // Unknown commands are ordinary text.
        _ => Input::Text(line.to_string()),
    }
}
