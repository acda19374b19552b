use crate::{
    api::{attendance, benefit, dashboard, employee, leave_request, organization, user},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use anyhow::{Result, anyhow};
use std::sync::Arc;

type Limiter = Arc<Governor<PeerIpKeyExtractor, NoOpMiddleware>>;

/// Per-IP limiters, built once and shared by every worker.
#[derive(Clone)]
pub struct Limiters {
    login: Limiter,
    register: Limiter,
    refresh: Limiter,
    protected: Limiter,
}

impl Limiters {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            login: build_limiter("login", config.rate_login_per_min)?,
            register: build_limiter("register", config.rate_register_per_min)?,
            refresh: build_limiter("refresh", config.rate_refresh_per_min)?,
            protected: build_limiter("protected", config.rate_protected_per_min)?,
        })
    }
}

fn build_limiter(name: &str, requests_per_min: u32) -> Result<Limiter> {
    let per_ms = if requests_per_min == 0 {
        1
    } else {
        60_000 / requests_per_min as u64
    };
    let cfg = GovernorConfigBuilder::default()
        .milliseconds_per_request(per_ms.max(1))
        .burst_size(requests_per_min.max(1))
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow!("invalid {name} rate limit: {requests_per_min}/min"))?;
    Ok(Arc::new(Governor::new(&cfg)))
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config, limiters: &Limiters) {
    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(limiters.login.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/register")
                    .wrap(limiters.register.clone())
                    .route(web::post().to(handlers::register)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(limiters.refresh.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(limiters.login.clone())
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Protected routes; fixed paths are registered before `/{id}` ones
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(limiters.protected.clone()) // rate limiting
            .service(
                web::scope("/employee")
                    // /employee
                    .service(
                        web::resource("")
                            .route(web::post().to(employee::create_employee))
                            .route(web::get().to(employee::list_employees)),
                    )
                    // /employee/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::put().to(employee::update_employee))
                            .route(web::get().to(employee::get_employee))
                            .route(web::delete().to(employee::delete_employee)),
                    ),
            )
            .service(
                web::scope("/organization")
                    .service(web::resource("/tree").route(web::get().to(organization::get_org_tree)))
                    .service(
                        web::resource("/companies")
                            .route(web::get().to(organization::list_companies))
                            .route(web::post().to(organization::create_company)),
                    )
                    .service(
                        web::resource("/companies/{id}/parent")
                            .route(web::put().to(organization::reparent_company)),
                    )
                    .service(
                        web::resource("/units")
                            .route(web::get().to(organization::list_units))
                            .route(web::post().to(organization::create_unit)),
                    )
                    .service(
                        web::resource("/departments")
                            .route(web::get().to(organization::list_departments))
                            .route(web::post().to(organization::create_department)),
                    )
                    .service(
                        web::resource("/departments/{id}/parent")
                            .route(web::put().to(organization::reparent_department)),
                    )
                    .service(
                        web::resource("/positions")
                            .route(web::get().to(organization::list_positions))
                            .route(web::post().to(organization::create_position)),
                    )
                    .service(
                        web::resource("/shifts")
                            .route(web::get().to(organization::list_shifts))
                            .route(web::post().to(organization::create_shift)),
                    ),
            )
            .service(
                web::scope("/leave")
                    // /leave
                    .service(
                        web::resource("")
                            .route(web::get().to(leave_request::leave_list))
                            .route(web::post().to(leave_request::create_leave)),
                    )
                    .service(web::resource("/summary").route(web::get().to(leave_request::leave_summary)))
                    .service(
                        web::resource("/requests").route(web::get().to(leave_request::my_leave_requests)),
                    )
                    .service(
                        web::resource("/types")
                            .route(web::get().to(leave_request::list_leave_types))
                            .route(web::post().to(leave_request::create_leave_type)),
                    )
                    // /leave/{id}
                    .service(web::resource("/{id}").route(web::get().to(leave_request::get_leave)))
                    // /leave/{id}/approve
                    .service(
                        web::resource("/{id}/approve")
                            .route(web::put().to(leave_request::approve_leave)),
                    )
                    // /leave/{id}/reject
                    .service(
                        web::resource("/{id}/reject")
                            .route(web::put().to(leave_request::reject_leave)),
                    )
                    // /leave/{id}/cancel
                    .service(
                        web::resource("/{id}/cancel")
                            .route(web::put().to(leave_request::cancel_leave)),
                    ),
            )
            .service(
                web::scope("/attendance")
                    // /attendance
                    .service(
                        web::resource("")
                            .route(web::put().to(attendance::check_out))
                            .route(web::post().to(attendance::check_in)),
                    )
                    .service(
                        web::resource("/monthly")
                            .route(web::get().to(attendance::get_attendance_data)),
                    )
                    .service(
                        web::resource("/records")
                            .route(web::put().to(attendance::mark_attendance)),
                    ),
            )
            .service(
                web::scope("/benefit")
                    .service(web::resource("/summary").route(web::get().to(benefit::get_benefit_summary)))
                    .service(
                        web::resource("/types")
                            .route(web::get().to(benefit::list_benefit_types))
                            .route(web::post().to(benefit::create_benefit_type)),
                    )
                    .service(web::resource("/budgets").route(web::put().to(benefit::upsert_budget)))
                    .service(
                        web::resource("/claims")
                            .route(web::get().to(benefit::list_claims))
                            .route(web::post().to(benefit::submit_benefit_claim)),
                    )
                    .service(
                        web::resource("/claims/{id}/approve").route(web::put().to(benefit::approve_claim)),
                    )
                    .service(
                        web::resource("/claims/{id}/reject").route(web::put().to(benefit::reject_claim)),
                    )
                    .service(
                        web::resource("/claims/{id}/cancel").route(web::put().to(benefit::cancel_claim)),
                    ),
            )
            .service(
                web::resource("/dashboard").route(web::get().to(dashboard::get_dashboard_summary)),
            )
            .service(
                web::scope("/users")
                    .service(web::resource("").route(web::get().to(user::list_users)))
                    .service(web::resource("/{id}").route(web::delete().to(user::delete_user)))
                    .service(web::resource("/{id}/role").route(web::put().to(user::change_role)))
                    .service(web::resource("/{id}/employee").route(web::put().to(user::link_employee)))
                    .service(web::resource("/{id}/active").route(web::put().to(user::set_active))),
            ),
    );
}

// LOGIN
//  ├─ access_token (15 min)
//  └─ refresh_token (7 days)

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ returns a new pair; the old refresh token is revoked

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use crate::test_support::{auth_header, lazy_pool, test_config};
    use actix_web::{App, http::StatusCode};
    use actix_web::test::{TestRequest, call_service, init_service};

    #[test]
    fn limiters_build_from_defaults() {
        assert!(Limiters::from_config(&test_config()).is_ok());
    }

    #[actix_web::test]
    async fn protected_scope_requires_token() {
        let config = test_config();
        let limiters = Limiters::from_config(&config).unwrap();
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(config.clone()))
                .configure(|cfg| configure(cfg, &config, &limiters)),
        )
        .await;

        let req = TestRequest::get()
            .uri("/api/dashboard")
            .peer_addr("127.0.0.1:40000".parse().unwrap())
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn fixed_leave_paths_win_over_id_route() {
        let config = test_config();
        let limiters = Limiters::from_config(&config).unwrap();
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(config.clone()))
                .configure(|cfg| configure(cfg, &config, &limiters)),
        )
        .await;

        // reaches leave_summary, which refuses another employee's data without the DB
        let req = TestRequest::get()
            .uri("/api/leave/summary?employee_id=9")
            .peer_addr("127.0.0.1:40000".parse().unwrap())
            .insert_header(auth_header(Role::Employee, Some(2)))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
