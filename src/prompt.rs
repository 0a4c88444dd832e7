/*
 * SPDX-FileCopyrightText: Copyright (c) 2023-2025, NVIDIA CORPORATION. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use snafu::prelude::*;
use std::{
    io::{self, IsTerminal},
    thread,
};
use tokio::sync::oneshot;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum Error {
    #[snafu(display("Failed to read answer from the terminal"))]
    Terminal { source: dialoguer::Error },
    #[snafu(display("Failed to start prompt thread"))]
    Thread { source: io::Error },
    #[snafu(display("Prompt thread exited without an answer"))]
    Interrupted { source: oneshot::error::RecvError },
}

/// Source of yes/no answers for the destructive steps of a run.
#[allow(async_fn_in_trait)]
pub trait Confirm {
    async fn confirm(&mut self, question: &str) -> Result<bool, Error>;
}

pub fn parse_answer(answer: &str) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

type Ask = fn(&str) -> Result<bool, Error>;

/// Asks on the terminal. Escape, end of input and a missing terminal all decline.
fn terminal(question: &str) -> Result<bool, Error> {
    if !io::stdin().is_terminal() {
        tracing::warn!(question, "no terminal to confirm on, declining");
        return Ok(false);
    }
    match dialoguer::Confirm::new().with_prompt(question).interact_opt() {
        Ok(answer) => Ok(answer.unwrap_or(false)),
        Err(dialoguer::Error::IO(err)) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(source) => Err(Error::Terminal { source }),
    }
}

/// Uses the pre-supplied answer when there is one, otherwise asks on the terminal.
pub struct Prompt {
    answer: Option<bool>,
    ask: Ask,
}

impl Prompt {
    pub fn new(answer: Option<bool>) -> Self {
        Self { answer, ask: terminal }
    }

    #[cfg(test)]
    pub fn with_terminal(ask: Ask) -> Self {
        Self { answer: None, ask }
    }
}

impl Confirm for Prompt {
    async fn confirm(&mut self, question: &str) -> Result<bool, Error> {
        if let Some(answer) = self.answer {
            tracing::debug!(question, answer, "using pre-supplied answer");
            return Ok(answer);
        }

        // The terminal read blocks, so it runs on a detached thread. Timers keep firing while the
        // question is open, and an abandoned question does not hold up runtime shutdown.
        let (tx, rx) = oneshot::channel();
        let (ask, question) = (self.ask, question.to_owned());
        thread::Builder::new()
            .name("prompt".to_owned())
            .spawn(move || {
                let _ = tx.send(ask(&question));
            })
            .context(Thread)?;

        rx.await.context(Interrupted)?
    }
}
