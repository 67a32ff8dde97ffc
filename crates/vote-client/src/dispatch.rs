use serde::de::IgnoredAny;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};
use vote_common::{ContractTrait, GatewayError, Submitted};

pub const GET_ALL_VOTES: &str = "GetAllVotes";
pub const VOTE_USER: &str = "VoteUser";
pub const GET_USER_VOTE: &str = "GetUserVote";
pub const INIT_LEDGER: &str = "InitLedger";

pub const MENU: &str = "Please input your choice:\n\
1: Get all users' votes\n\
2: Vote for user\n\
3: Query a user's vote by username\n\
9: Quit";
pub const INPUT_ERROR: &str = "Input Error";
pub const CLOSING: &str = "============ vote client ends ============";

/// How a contract function reaches the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Read-only, answered by a single peer.
    Evaluate,
    /// Endorsed, ordered and committed.
    Submit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ListAll,
    Vote,
    QueryOne,
    Quit,
    Unrecognized,
}

impl Operation {
    pub fn from_code(token: &str) -> Self {
        match token.parse::<i64>() {
            Ok(1) => Operation::ListAll,
            Ok(2) => Operation::Vote,
            Ok(3) => Operation::QueryOne,
            Ok(9) => Operation::Quit,
            _ => Operation::Unrecognized,
        }
    }

    /// Contract function and call kind, for operations that reach the ledger.
    pub fn function(self) -> Option<(&'static str, CallKind)> {
        match self {
            Operation::ListAll => Some((GET_ALL_VOTES, CallKind::Evaluate)),
            Operation::Vote => Some((VOTE_USER, CallKind::Submit)),
            Operation::QueryOne => Some((GET_USER_VOTE, CallKind::Evaluate)),
            Operation::Quit | Operation::Unrecognized => None,
        }
    }

    /// Prompt for the username argument, if the operation takes one.
    pub fn username_prompt(self) -> Option<&'static str> {
        match self {
            Operation::Vote => Some("Please enter your username you want to vote:"),
            Operation::QueryOne => Some("Please enter your username you want to query:"),
            _ => None,
        }
    }
}

/// Whitespace-delimited tokens read line by line.
pub struct Tokens<R> {
    reader: R,
    pending: VecDeque<String>,
}

impl<R: AsyncBufRead + Unpin> Tokens<R> {
    pub fn new(reader: R) -> Self {
        Tokens {
            reader,
            pending: VecDeque::new(),
        }
    }

    /// Returns `None` at end of input.
    pub async fn next_token(&mut self) -> Result<Option<String>, GatewayError> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(Some(token));
            }
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| GatewayError::IoError(e.to_string()))?;
            if read == 0 {
                return Ok(None);
            }
            self.pending
                .extend(line.split_whitespace().map(str::to_string));
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

/// The interactive menu loop: one remote call per iteration at most.
pub struct Dispatcher<R, W> {
    contract: Arc<dyn ContractTrait>,
    input: Tokens<R>,
    output: W,
}

impl<R: AsyncBufRead + Unpin, W: Write> Dispatcher<R, W> {
    pub fn new(contract: Arc<dyn ContractTrait>, input: R, output: W) -> Self {
        Dispatcher {
            contract,
            input: Tokens::new(input),
            output,
        }
    }

    /// Runs until quit, end of input or the first failed call.
    pub async fn run(&mut self) -> Result<(), GatewayError> {
        loop {
            self.say(MENU)?;
            let Some(code) = self.input.next_token().await? else {
                info!("End of input, leaving menu");
                return Ok(());
            };
            let operation = Operation::from_code(&code);
            debug!("Selected {:?} ({})", operation, code);
            if let Flow::Stop = self.dispatch(operation).await? {
                return Ok(());
            }
        }
    }

    async fn dispatch(&mut self, operation: Operation) -> Result<Flow, GatewayError> {
        let Some((function, kind)) = operation.function() else {
            if operation == Operation::Quit {
                self.say(CLOSING)?;
                return Ok(Flow::Stop);
            }
            self.say(INPUT_ERROR)?;
            return Ok(Flow::Continue);
        };

        let mut args = Vec::new();
        if let Some(prompt) = operation.username_prompt() {
            self.say(prompt)?;
            match self.input.next_token().await? {
                Some(username) => args.push(username),
                None => {
                    info!("End of input while reading username");
                    return Ok(Flow::Stop);
                }
            }
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        match kind {
            CallKind::Evaluate => {
                let payload = self.contract.evaluate(function, &args).await.map_err(|e| {
                    GatewayError::EvaluateFailed {
                        function: function.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                let pretty = format_json(&payload)?;
                self.say(&pretty)?;
            }
            CallKind::Submit => {
                let submitted = self.contract.submit(function, &args).await.map_err(|e| {
                    GatewayError::SubmitFailed {
                        function: function.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                debug!("{} committed as {}", function, submitted.transaction_id);
            }
        }
        Ok(Flow::Continue)
    }

    fn say(&mut self, line: &str) -> Result<(), GatewayError> {
        writeln!(self.output, "{}", line)
            .and_then(|_| self.output.flush())
            .map_err(|e| GatewayError::IoError(e.to_string()))
    }
}

/// Submits `InitLedger` once; never reachable from the menu.
pub async fn init_ledger<W: Write>(
    contract: &dyn ContractTrait,
    output: &mut W,
) -> Result<Submitted, GatewayError> {
    let io = |e: std::io::Error| GatewayError::IoError(e.to_string());
    writeln!(
        output,
        "Submit Transaction: {}, function creates the initial set of assets on the ledger",
        INIT_LEDGER
    )
    .map_err(io)?;

    let submitted = contract.submit(INIT_LEDGER, &[]).await.map_err(|e| {
        GatewayError::SubmitFailed {
            function: INIT_LEDGER.to_string(),
            reason: e.to_string(),
        }
    })?;

    writeln!(output, "*** Transaction committed successfully").map_err(io)?;
    Ok(submitted)
}

/// Re-indents JSON with a one-space step.
///
/// The payload is validated first, then copied token by token: only whitespace
/// between tokens changes. Member order, duplicate keys, number text and string
/// escapes are printed exactly as the chaincode returned them.
pub fn format_json(data: &[u8]) -> Result<String, GatewayError> {
    let text = std::str::from_utf8(data).map_err(|e| GatewayError::InvalidJson(e.to_string()))?;
    serde_json::from_str::<IgnoredAny>(text)
        .map_err(|e| GatewayError::InvalidJson(e.to_string()))?;

    let mut out = String::with_capacity(text.len() * 2);
    let mut depth = 0usize;
    let mut open = false;
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c.is_ascii_whitespace() {
            continue;
        }
        // first child of an object or array goes on its own line
        if open && c != '}' && c != ']' {
            open = false;
            newline(&mut out, depth);
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' | '[' => {
                out.push(c);
                depth += 1;
                open = true;
            }
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if open {
                    open = false;
                } else {
                    newline(&mut out, depth);
                }
                out.push(c);
            }
            ',' => {
                out.push(c);
                newline(&mut out, depth);
            }
            ':' => out.push_str(": "),
            _ => out.push(c),
        }
    }
    Ok(out)
}

fn newline(out: &mut String, depth: usize) {
    out.push('\n');
    out.extend(std::iter::repeat(' ').take(depth));
}
