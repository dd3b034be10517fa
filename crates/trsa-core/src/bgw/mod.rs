//! BGW multiplication of additively shared values
//!
//! Each party masks its additive inputs x_i, y_i with random polynomials
//! f_i, g_i of degree l and a zero-constant h_i of degree 2l, and hands every
//! other member the evaluations at its point. Party j then holds
//!
//! ```text
//! N_j = (sum_i f_i(j)) * (sum_i g_i(j)) + sum_i h_i(j)   mod W
//! ```
//!
//! a point on a degree-2l polynomial whose constant term is X * Y. Any
//! `2l + 1` of the N_j reveal the product; `lambda_j * N_j` turns them back
//! into additive shares for chained multiplications.

mod messages;
mod multiply;

pub use messages::{CrossTerms, PointShare};
pub use multiply::{
    reconstruct_product, reveal_products, run_bgw_multiply, BgwRound, ProductShares,
};
