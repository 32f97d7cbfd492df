/*
 * Copyright (C) 2026 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

use clap::Parser;

use boom::cli::BoomCommand;

fn main() {
    let cmd = BoomCommand::parse();
    env_logger::Builder::from_default_env()
        .filter(None, cmd.loglevel())
        .init();
    match cmd.run() {
        Ok(_) => {}
        Err(e) => {
            // Use the alternative formatter to get everything on a single line...it reads better.
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}
