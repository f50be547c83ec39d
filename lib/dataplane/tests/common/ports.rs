// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use tokio::net::TcpListener;

/// Asks the OS for a free port. The listener is dropped before returning, so
/// the port is only very likely to still be free.
pub async fn get_random_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind to a random port");
    listener
        .local_addr()
        .expect("listener has no local address")
        .port()
}
