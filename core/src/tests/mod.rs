// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

mod determinism_tests;
mod pipeline_tests;
mod randomized_tests;
